pub mod blob_detector;
pub mod candidate;
pub mod color_mask;
pub mod detection;
pub mod frame_io;
pub mod overlay;
pub mod trail;
pub mod vehicle_scan;
