pub mod radio;
pub mod tag;
