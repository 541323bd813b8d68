// handlers/mod.rs - one module per resource; /health is the only public handler

pub mod health;
pub mod members;
pub mod profiles;
pub mod projects;
