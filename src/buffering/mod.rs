//! Lock-free SPSC ring buffer for capture samples.
//!
//! The cpal input callback writes straight into the producer half via the
//! wait-free `push_slice`; the pump thread drains the consumer half. Nothing
//! on the callback side allocates or blocks.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Producer half — held by the audio callback thread.
pub type SampleProducer = ringbuf::HeapProd<f32>;

/// Consumer half — held by the capture pump thread.
pub type SampleConsumer = ringbuf::HeapCons<f32>;

/// Capacity: 2^20 = 1 048 576 f32 samples ≈ 21.8 s at 48 kHz.
/// Frames captured between connect and the endpoint's open event sit here,
/// so the backlog window is deliberately generous.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap ring buffer.
pub fn create_capture_ring() -> (SampleProducer, SampleConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_pop_preserve_order() {
        let (mut producer, mut consumer) = create_capture_ring();
        let input: Vec<f32> = (0..512).map(|i| i as f32).collect();
        assert_eq!(producer.push_slice(&input), input.len());

        let mut out = vec![0f32; 512];
        assert_eq!(consumer.pop_slice(&mut out), 512);
        assert_eq!(out, input);
    }
}
