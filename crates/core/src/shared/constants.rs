/// Every Nth frame of a stream gets the accurate ensemble pass.
pub const DEFAULT_ACCURATE_INTERVAL: u64 = 10;

pub const SEETA_MODEL_NAME: &str = "seeta_fd_frontal_v1.0.bin";
pub const SEETA_MODEL_URL: &str =
    "https://github.com/atomashpolskiy/rustface/raw/master/model/seeta_fd_frontal_v1.0.bin";

/// Base URL for the stock OpenCV Haar cascades.
pub const HAAR_CASCADE_BASE_URL: &str =
    "https://raw.githubusercontent.com/opencv/opencv/4.x/data/haarcascades";

pub const HAAR_FRONTAL_DEFAULT: &str = "haarcascade_frontalface_default.xml";
pub const HAAR_FRONTAL_ALT: &str = "haarcascade_frontalface_alt.xml";
pub const HAAR_FRONTAL_ALT2: &str = "haarcascade_frontalface_alt2.xml";
pub const HAAR_PROFILE: &str = "haarcascade_profileface.xml";

#[cfg(target_os = "linux")]
pub const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
#[cfg(target_os = "macos")]
pub const DEFAULT_CAMERA_DEVICE: &str = "0";
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub const DEFAULT_CAMERA_DEVICE: &str = "video=Integrated Camera";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

/// Capacity of the session event channel; events beyond it are dropped.
pub const SESSION_EVENT_CAPACITY: usize = 64;
