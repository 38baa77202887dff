pub mod cache;
pub mod compose;
pub mod dockerfile;
pub mod dockerimage;
pub mod kubernetes;
