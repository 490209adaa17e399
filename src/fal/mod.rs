//! fal.ai queue client for image-to-video generation.

mod client;

pub use client::{
    image_data_uri, image_mime_type, FalClient, FalError, GenerationStatus, QueueResponse, DEFAULT_MODEL,
    FAL_API_BASE_URL,
};
