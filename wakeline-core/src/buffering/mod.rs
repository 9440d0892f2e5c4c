//! Lock-free SPSC ring buffers for audio samples.
//!
//! Two element widths are used: raw 32-bit capture slots between the audio
//! callback and the capture reader, and working-precision `i16` samples
//! inside the stub engine between `feed` and `fetch`.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half for raw capture slots, held by the audio callback.
pub type SlotProducer = ringbuf::HeapProd<i32>;

/// Consumer half for raw capture slots, held by the capture reader.
pub type SlotConsumer = ringbuf::HeapCons<i32>;

/// Producer half for working samples.
pub type SampleProducer = ringbuf::HeapProd<i16>;

/// Consumer half for working samples.
pub type SampleConsumer = ringbuf::HeapCons<i16>;

/// Create a matched producer/consumer pair for raw capture slots.
pub fn create_slot_ring(capacity: usize) -> (SlotProducer, SlotConsumer) {
    HeapRb::<i32>::new(capacity.max(1)).split()
}

/// Create a matched producer/consumer pair for working samples.
pub fn create_sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    HeapRb::<i16>::new(capacity.max(1)).split()
}
