//! Wire types shared by the coordinator, the chunk workers and report files.
//!
//! Messages are declared with `prost` derives directly so the crate builds
//! without a `protoc` toolchain. Field tags are stable; only append.

pub mod proto {
    /// Axis-aligned pixel rectangle.
    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Rect {
        #[prost(uint32, tag = "1")]
        pub x: u32,
        #[prost(uint32, tag = "2")]
        pub y: u32,
        #[prost(uint32, tag = "3")]
        pub width: u32,
        #[prost(uint32, tag = "4")]
        pub height: u32,
    }

    /// Inclusive HSV bounds (H 0-179, S/V 0-255).
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct HsvBounds {
        #[prost(uint32, repeated, tag = "1")]
        pub lower: ::prost::alloc::vec::Vec<u32>,
        #[prost(uint32, repeated, tag = "2")]
        pub upper: ::prost::alloc::vec::Vec<u32>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum TransitionKind {
        Unspecified = 0,
        BecameEmpty = 1,
        BecameFull = 2,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct StaminaEvent {
        #[prost(uint32, tag = "1")]
        pub frame_index: u32,
        #[prost(enumeration = "TransitionKind", tag = "2")]
        pub kind: i32,
    }

    /// One unit of work handed to a worker process on stdin.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ChunkRequest {
        #[prost(string, tag = "1")]
        pub video_path: ::prost::alloc::string::String,
        #[prost(uint32, tag = "2")]
        pub start_frame: u32,
        #[prost(uint32, tag = "3")]
        pub end_frame: u32,
        #[prost(message, optional, tag = "4")]
        pub rect: ::core::option::Option<Rect>,
        #[prost(message, optional, tag = "5")]
        pub color_range: ::core::option::Option<HsvBounds>,
        /// Directory for debug overlays, empty when diagnostics are off.
        #[prost(string, tag = "6")]
        pub debug_dir: ::prost::alloc::string::String,
        /// Effective analyzer configuration as TOML text.
        #[prost(string, tag = "7")]
        pub config_toml: ::prost::alloc::string::String,
        /// Font file for overlay labels, empty for unlabelled overlays.
        #[prost(string, tag = "8")]
        pub debug_font: ::prost::alloc::string::String,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct ChunkProgress {
        #[prost(uint32, tag = "1")]
        pub frames_done: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ChunkFinished {
        #[prost(message, repeated, tag = "1")]
        pub events: ::prost::alloc::vec::Vec<StaminaEvent>,
        #[prost(uint32, tag = "2")]
        pub frames_done: u32,
    }

    /// Messages a worker streams back on stdout, length-delimited.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct WorkerMessage {
        #[prost(oneof = "worker_message::Payload", tags = "1, 2, 3")]
        pub payload: ::core::option::Option<worker_message::Payload>,
    }

    pub mod worker_message {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Payload {
            #[prost(message, tag = "1")]
            Progress(super::ChunkProgress),
            #[prost(message, tag = "2")]
            Finished(super::ChunkFinished),
            #[prost(string, tag = "3")]
            Failed(::prost::alloc::string::String),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct VideoFileSource {
        #[prost(string, tag = "1")]
        pub file_path: ::prost::alloc::string::String,
        #[prost(uint32, tag = "2")]
        pub width: u32,
        #[prost(uint32, tag = "3")]
        pub height: u32,
        #[prost(double, tag = "4")]
        pub fps: f64,
        #[prost(uint32, tag = "5")]
        pub frame_count: u32,
    }

    /// Result of a full `analyze` run, written to the output file.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct AnalysisReport {
        #[prost(message, optional, tag = "1")]
        pub source: ::core::option::Option<VideoFileSource>,
        #[prost(message, optional, tag = "2")]
        pub rect: ::core::option::Option<Rect>,
        #[prost(bool, tag = "3")]
        pub rect_is_fallback: bool,
        #[prost(message, optional, tag = "4")]
        pub color_range: ::core::option::Option<HsvBounds>,
        #[prost(bool, tag = "5")]
        pub color_range_is_fallback: bool,
        #[prost(message, repeated, tag = "6")]
        pub events: ::prost::alloc::vec::Vec<StaminaEvent>,
        /// `MM:SS` for each empty event, in frame order.
        #[prost(string, repeated, tag = "7")]
        pub empty_timestamps: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    }
}
