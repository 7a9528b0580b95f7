//! Frame splitting for the shared event byte stream.
//!
//! Events are delimited by the closing `</event>` marker. Each transport
//! channel owns one [`FrameBuffer`]; bytes are pushed as they arrive and
//! complete frames come back in receipt order, with any trailing partial
//! frame retained for the next push.

/// Closing marker terminating one event frame.
pub const FRAME_DELIMITER: &[u8] = b"</event>";

/// Per-channel accumulation buffer.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes and return every complete frame now
    /// available. A frame includes its closing marker. No frame is ever
    /// split or duplicated across calls.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(end) = find_delimiter(&self.buf) {
            let frame_len = end + FRAME_DELIMITER.len();
            let rest = self.buf.split_off(frame_len);
            frames.push(std::mem::replace(&mut self.buf, rest));
        }
        frames
    }

    /// Bytes currently held back as a partial frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_DELIMITER.len())
        .position(|w| w == FRAME_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_frame() {
        let mut fb = FrameBuffer::new();
        let frames = fb.push(b"<event a=\"1\"></event>");
        assert_eq!(frames, vec![b"<event a=\"1\"></event>".to_vec()]);
        assert_eq!(fb.pending(), 0);
    }

    #[test]
    fn test_partial_frame_is_retained() {
        let mut fb = FrameBuffer::new();
        assert!(fb.push(b"<event><point/").is_empty());
        assert_eq!(fb.pending(), 14);
        let frames = fb.push(b"></event>");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], b"<event><point/></event>".to_vec());
        assert_eq!(fb.pending(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut fb = FrameBuffer::new();
        let frames = fb.push(b"<event>1</event><event>2</event><event>3");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], b"<event>1</event>".to_vec());
        assert_eq!(frames[1], b"<event>2</event>".to_vec());
        assert_eq!(fb.pending(), 8);
        let frames = fb.push(b"</event>");
        assert_eq!(frames, vec![b"<event>3</event>".to_vec()]);
    }

    #[test]
    fn test_delimiter_split_across_reads() {
        let mut fb = FrameBuffer::new();
        assert!(fb.push(b"<event>x</ev").is_empty());
        let frames = fb.push(b"ent><event>y");
        assert_eq!(frames, vec![b"<event>x</event>".to_vec()]);
        assert_eq!(fb.pending(), 8);
    }

    #[test]
    fn test_byte_for_byte_feed_never_splits_a_frame() {
        let input = b"<event>alpha</event><event>beta</event>";
        let mut fb = FrameBuffer::new();
        let mut frames = Vec::new();
        for b in input {
            frames.extend(fb.push(std::slice::from_ref(b)));
        }
        assert_eq!(
            frames,
            vec![
                b"<event>alpha</event>".to_vec(),
                b"<event>beta</event>".to_vec()
            ]
        );
        assert_eq!(fb.pending(), 0);
    }
}
