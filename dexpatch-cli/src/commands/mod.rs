pub mod apply;
pub mod block;
pub mod common;
pub mod info;
pub mod methods;
pub mod resolve;
