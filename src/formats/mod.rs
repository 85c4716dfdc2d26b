pub mod cpt;
pub mod hqx;
pub mod macbinary;
pub mod sit;
pub mod sit5;
