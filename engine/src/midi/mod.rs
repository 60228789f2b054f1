pub mod clip;
pub mod io;
pub mod producer;
