pub mod downscale;
pub mod image;
pub mod transfer;
