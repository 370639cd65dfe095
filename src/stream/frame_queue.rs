//! Per-stream FIFO of frames handed back to the consumer
//!
//! The pipeline never fills this queue itself; consumers that want to buffer
//! decoded frames enqueue them here and read the pts bookkeeping back.

use super::frame::MediaFrame;
use std::collections::VecDeque;

/// FIFO of frames with pts bookkeeping
pub struct FrameQueue {
    /// Frames in arrival order
    frames: VecDeque<MediaFrame>,

    /// Maximum number of frames to buffer
    max_frames: usize,

    /// Total payload bytes buffered
    total_size: usize,

    /// Statistics
    stats: QueueStats,

    /// Pts of the first frame ever enqueued since the last clear
    first_pts: Option<u64>,

    /// Pts of the most recently popped frame
    last_popped_pts: Option<u64>,

    /// Pts of the most recently enqueued frame
    last_enqueued_pts: Option<u64>,
}

/// Queue statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total frames added
    pub frames_added: u64,

    /// Total frames dropped due to queue full
    pub frames_dropped: u64,

    /// Total frames consumed
    pub frames_consumed: u64,

    /// Maximum queue depth reached
    pub max_depth: usize,

    /// Total bytes processed
    pub bytes_processed: u64,
}

impl FrameQueue {
    /// Create a new frame queue with specified capacity
    pub fn new(max_frames: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(max_frames.min(64)),
            max_frames: max_frames.max(1),
            total_size: 0,
            stats: QueueStats::default(),
            first_pts: None,
            last_popped_pts: None,
            last_enqueued_pts: None,
        }
    }

    /// Append a frame, dropping the oldest one when full
    pub fn push_frame(&mut self, frame: MediaFrame) {
        if let Some(last_pts) = self.last_enqueued_pts {
            if frame.pts < last_pts {
                log::warn!(
                    "Frame pts {} is less than last pts {}, possible ordering issue",
                    frame.pts,
                    last_pts
                );
            }
        }

        while self.frames.len() >= self.max_frames {
            self.drop_oldest_frame();
        }

        let frame_size = frame.len();
        self.first_pts.get_or_insert(frame.pts);
        self.last_enqueued_pts = Some(frame.pts);
        self.frames.push_back(frame);
        self.total_size += frame_size;

        self.stats.frames_added += 1;
        self.stats.max_depth = self.stats.max_depth.max(self.frames.len());
        self.stats.bytes_processed += frame_size as u64;
    }

    /// Pop the next frame from the queue
    pub fn pop_frame(&mut self) -> Option<MediaFrame> {
        let frame = self.frames.pop_front()?;
        self.total_size = self.total_size.saturating_sub(frame.len());
        self.last_popped_pts = Some(frame.pts);
        self.stats.frames_consumed += 1;
        Some(frame)
    }

    /// Peek at the next frame without removing it
    pub fn peek_frame(&self) -> Option<&MediaFrame> {
        self.frames.front()
    }

    /// Drop frames older than specified pts
    pub fn drop_frames_before(&mut self, pts: u64) {
        while self.frames.front().is_some_and(|frame| frame.pts < pts) {
            self.drop_oldest_frame();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.max_frames
    }

    /// Payload bytes currently buffered
    pub fn buffered_bytes(&self) -> usize {
        self.total_size
    }

    /// Clear all frames and pts bookkeeping
    pub fn clear(&mut self) {
        self.frames.clear();
        self.total_size = 0;
        self.first_pts = None;
        self.last_popped_pts = None;
        self.last_enqueued_pts = None;
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn first_pts(&self) -> Option<u64> {
        self.first_pts
    }

    pub fn last_popped_pts(&self) -> Option<u64> {
        self.last_popped_pts
    }

    pub fn last_enqueued_pts(&self) -> Option<u64> {
        self.last_enqueued_pts
    }

    /// Pts span between the oldest buffered frame and the end of the newest
    pub fn buffered_duration(&self) -> u64 {
        match (self.frames.front(), self.frames.back()) {
            (Some(front), Some(back)) => (back.pts + back.duration).saturating_sub(front.pts),
            _ => 0,
        }
    }

    fn drop_oldest_frame(&mut self) {
        if let Some(frame) = self.frames.pop_front() {
            self.total_size = self.total_size.saturating_sub(frame.len());
            self.stats.frames_dropped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MediaStream, StreamDetails, StreamInfo, VideoInfo};

    fn create_test_frame(pts: u64) -> MediaFrame {
        let stream = MediaStream::new(0, StreamInfo::new("rgb32", StreamDetails::Video(VideoInfo::new(4, 4))));
        let mut frame = MediaFrame::new(&stream);
        frame.set_data(&[0; 64]);
        frame.pts = pts;
        frame.duration = 400_000;
        frame
    }

    #[test]
    fn test_frame_queue_basic() {
        let mut queue = FrameQueue::new(10);

        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);

        queue.push_frame(create_test_frame(0));
        queue.push_frame(create_test_frame(400_000));
        queue.push_frame(create_test_frame(800_000));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.buffered_bytes(), 192);

        assert_eq!(queue.pop_frame().unwrap().pts, 0);
        assert_eq!(queue.pop_frame().unwrap().pts, 400_000);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.last_popped_pts(), Some(400_000));
        assert_eq!(queue.first_pts(), Some(0));
        assert_eq!(queue.last_enqueued_pts(), Some(800_000));
    }

    #[test]
    fn test_frame_queue_keeps_arrival_order() {
        let mut queue = FrameQueue::new(10);

        queue.push_frame(create_test_frame(800_000));
        queue.push_frame(create_test_frame(0));

        assert_eq!(queue.pop_frame().unwrap().pts, 800_000);
        assert_eq!(queue.pop_frame().unwrap().pts, 0);
    }

    #[test]
    fn test_frame_queue_capacity() {
        let mut queue = FrameQueue::new(3);

        queue.push_frame(create_test_frame(0));
        queue.push_frame(create_test_frame(400_000));
        queue.push_frame(create_test_frame(800_000));
        assert!(queue.is_full());

        queue.push_frame(create_test_frame(1_200_000));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.stats().frames_dropped, 1);
        assert_eq!(queue.pop_frame().unwrap().pts, 400_000);
    }

    #[test]
    fn test_buffered_duration() {
        let mut queue = FrameQueue::new(10);
        assert_eq!(queue.buffered_duration(), 0);

        queue.push_frame(create_test_frame(1_000_000));
        queue.push_frame(create_test_frame(2_000_000));
        assert_eq!(queue.buffered_duration(), 1_400_000);

        queue.drop_frames_before(2_000_000);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.buffered_duration(), 400_000);

        queue.clear();
        assert!(queue.first_pts().is_none());
    }
}
