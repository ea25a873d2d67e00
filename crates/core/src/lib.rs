//! Face detection with an ensemble of boosted-cascade classifiers.
//!
//! Frames flow through `preprocessing` → `detection` (cadence-scheduled
//! ensemble + area-priority NMS) → `annotation`, orchestrated per frame by
//! [`pipeline::frame_pipeline::FramePipeline`] and per camera stream by
//! [`pipeline::detection_session::DetectionSession`].

pub mod shared {
    pub mod constants;
    pub mod face_box;
    pub mod frame;
    pub mod settings;
}

pub mod preprocessing {
    mod clahe;
    pub mod preprocessor;
}

pub mod detection {
    pub mod domain {
        pub mod box_merger;
        pub mod cadence;
        pub mod cascade_classifier;
        pub mod classifier_loader;
        pub mod detection_batch;
        pub mod ensemble;
        pub mod tuning;
    }
    pub mod infrastructure;
}

pub mod annotation {
    pub mod domain {
        pub mod frame_annotator;
    }
    pub mod infrastructure {
        pub mod box_annotator;
        mod glyphs;
    }
}

pub mod capture {
    pub mod domain {
        pub mod frame_source;
    }
    pub mod infrastructure {
        pub mod ffmpeg_capture;
        pub mod image_decoder;
        pub mod image_file_writer;
    }
}

pub mod pipeline {
    pub mod detection_session;
    pub mod frame_pipeline;
    pub mod pipeline_logger;
}
