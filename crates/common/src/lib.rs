pub mod analysis;
pub mod cameras;
pub mod events;
pub mod frame_extractor;
