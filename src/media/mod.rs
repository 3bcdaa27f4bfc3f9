mod services;

pub use services::{upload_image, UploadedFile};
