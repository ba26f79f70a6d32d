#![forbid(unsafe_code)]

mod rendering;

pub use rendering::{init_tracing, write_overlay_png, write_slice_png, Window};
