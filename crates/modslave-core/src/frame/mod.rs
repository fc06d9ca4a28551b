pub mod tcp;

pub use tcp::{
    frame_size, Frame, Header, MAX_ADU_LEN, MBAP_HEADER_LEN, MBAP_PREFIX_LEN, TCP_PROTOCOL_ID,
};
