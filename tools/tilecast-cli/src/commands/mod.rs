pub mod check;
pub mod export;
pub mod generate;
pub mod info;
pub mod still;
