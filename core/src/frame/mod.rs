mod codec;

pub use codec::{encode_frame, parse_frame, FrameDecoder, DEFAULT_MAX_FRAME_BYTES};
