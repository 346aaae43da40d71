// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Length-field framing
//!
//! Pipeline handler for stream transports. Outbound payloads get a 4-byte big-endian length
//! prefix. Inbound chunks are reassembled into the original messages whatever the chunking: one
//! chunk may complete many messages and one message may span many chunks, cut anywhere, the
//! header included.
//!
//! Reads of one connection must be delivered serially. The reassembly state is guarded by a
//! mutex; completed messages are emitted in order, after the lock is released and before
//! `on_read` returns.
//!

use crate::{
    Error,
    context::HandlerContext,
    handler::{Handler, Message},
    invocation::Reply,
    task::Task,
};

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, error};

/// Size of the length prefix.
pub const HEADER_SIZE: usize = 4;

/// Default upper bound for a frame body: 16 MiB.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Reassembly state of one connection.
struct FrameState {
    /// Length accumulator, shifted in one header byte at a time.
    length: u32,
    /// `-4..0` while reading the header, `0..length` while reading the body.
    position: i64,
    /// Body of the message being read, `None` while reading a header.
    buffer: Option<BytesMut>,
    /// Set once a bad prefix was seen. The connection is unusable from then on.
    corrupted: bool,
}

impl FrameState {
    fn new() -> Self {
        Self {
            length: 0,
            position: -(HEADER_SIZE as i64),
            buffer: None,
            corrupted: false,
        }
    }

    fn reset(&mut self) {
        self.length = 0;
        self.position = -(HEADER_SIZE as i64);
        self.buffer = None;
    }
}

/// Length-prefix framer.
pub struct LengthFieldFramer {
    max_frame_length: usize,
    state: Mutex<FrameState>,
}

impl Default for LengthFieldFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl LengthFieldFramer {
    /// Creates a framer rejecting bodies longer than `max_frame_length`.
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            state: Mutex::new(FrameState::new()),
        }
    }

    /// Prepends the length prefix to `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FramingCorruption`] if the payload does not fit the prefix or exceeds the
    /// maximum frame length.
    ///
    pub fn frame(&self, payload: &[u8]) -> Result<Bytes, Error> {
        let length = u32::try_from(payload.len())
            .ok()
            .filter(|length| *length as usize <= self.max_frame_length)
            .ok_or(Error::FramingCorruption {
                length: payload.len() as u64,
            })?;
        let mut framed = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        framed.put_u32(length);
        framed.put_slice(payload);
        Ok(framed.freeze())
    }

    /// Feeds `data` into the reassembly state, pushing every completed message to `frames`.
    ///
    /// The state lock is released before the caller emits the frames, so handlers reacting to a
    /// message may close or reset the connection.
    ///
    fn decode(&self, data: &[u8], frames: &mut Vec<Bytes>) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.corrupted {
            return Err(Error::FramingCorruption {
                length: state.length as u64,
            });
        }

        let mut index = 0;
        while index < data.len() {
            if state.position < 0 {
                state.length = (state.length << 8) | data[index] as u32;
                state.position += 1;
                index += 1;
                if state.position == 0 {
                    let length = state.length as usize;
                    if length > self.max_frame_length {
                        error!(
                            "Frame length {} exceeds the maximum of {}!",
                            length, self.max_frame_length
                        );
                        state.corrupted = true;
                        return Err(Error::FramingCorruption {
                            length: length as u64,
                        });
                    }
                    if length == 0 {
                        state.reset();
                        frames.push(Bytes::new());
                    } else {
                        state.buffer = Some(BytesMut::with_capacity(length));
                    }
                }
            } else {
                let length = state.length as usize;
                let read = state.position as usize;
                let take = (length - read).min(data.len() - index);
                if let Some(buffer) = state.buffer.as_mut() {
                    buffer.put_slice(&data[index..index + take]);
                }
                state.position += take as i64;
                index += take;
                if state.position as usize == length {
                    let message = state.buffer.take().map(BytesMut::freeze).unwrap_or_default();
                    state.reset();
                    frames.push(message);
                }
            }
        }
        Ok(())
    }
}

impl Handler for LengthFieldFramer {
    fn on_read(&self, ctx: &HandlerContext, message: Message) -> Result<(), Error> {
        match message {
            Message::Bytes(data) => {
                let mut frames = Vec::new();
                let result = self.decode(&data, &mut frames);
                for frame in frames {
                    ctx.fire_read(Message::Bytes(frame));
                }
                result
            }
            other => {
                ctx.fire_read(other);
                Ok(())
            }
        }
    }

    fn on_inactive(&self, ctx: &HandlerContext) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.position != -(HEADER_SIZE as i64) {
            debug!("Discarding a partially read frame.");
        }
        state.reset();
        state.corrupted = false;
        drop(state);
        ctx.fire_inactive();
        Ok(())
    }

    fn write(&self, ctx: &HandlerContext, message: Message) -> Result<Task<Reply>, Error> {
        match message {
            Message::Bytes(payload) => Ok(ctx.write(Message::Bytes(self.frame(&payload)?))),
            other => Ok(ctx.write(other)),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::{invocation::Value, pipeline::Pipeline};

    use proptest::prelude::*;

    use std::sync::{Arc, Weak};

    /// Collects every reassembled message.
    #[derive(Default)]
    struct Collector {
        messages: Mutex<Vec<Vec<u8>>>,
        errors: Mutex<Vec<Error>>,
    }

    impl Handler for Collector {
        fn on_read(&self, _ctx: &HandlerContext, message: Message) -> Result<(), Error> {
            if let Message::Bytes(bytes) = message {
                self.messages.lock().push(bytes.to_vec());
            }
            Ok(())
        }

        fn on_exception_caught(
            &self,
            _ctx: &HandlerContext,
            error: Error,
        ) -> Result<(), Error> {
            self.errors.lock().push(error);
            Ok(())
        }
    }

    /// Records what the framer writes.
    #[derive(Default)]
    struct Wire {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl Handler for Wire {
        fn write(&self, _ctx: &HandlerContext, message: Message) -> Result<Task<Reply>, Error> {
            if let Message::Bytes(bytes) = message {
                self.sent.lock().push(bytes.to_vec());
            }
            Ok(Task::completed(Arc::new(Value::Unit)))
        }
    }

    fn setup(max_frame_length: usize) -> (Pipeline, Arc<Collector>, Arc<Wire>) {
        let collector = Arc::new(Collector::default());
        let wire = Arc::new(Wire::default());
        let pipeline = Pipeline::new();
        pipeline.add_last("collector", collector.clone()).unwrap();
        pipeline
            .add_last("framer", Arc::new(LengthFieldFramer::new(max_frame_length)))
            .unwrap();
        pipeline.add_last("wire", wire.clone()).unwrap();
        (pipeline, collector, wire)
    }

    fn read(pipeline: &Pipeline, chunk: &[u8]) {
        pipeline.fire_read(Message::Bytes(Bytes::copy_from_slice(chunk)));
    }

    #[test]
    fn test_one_chunk_two_messages() {
        let (pipeline, collector, _) = setup(DEFAULT_MAX_FRAME_LENGTH);
        read(&pipeline, &[0, 0, 0, 2, 99, 100, 0, 0, 0, 3, 101, 102, 103]);
        assert_eq!(
            *collector.messages.lock(),
            vec![vec![99, 100], vec![101, 102, 103]]
        );
    }

    #[test]
    fn test_cut_inside_header() {
        let (pipeline, collector, _) = setup(DEFAULT_MAX_FRAME_LENGTH);
        read(&pipeline, &[0, 0]);
        read(&pipeline, &[0]);
        assert!(collector.messages.lock().is_empty());
        read(&pipeline, &[1, 7, 0, 0]);
        read(&pipeline, &[0, 0]);
        assert_eq!(*collector.messages.lock(), vec![vec![7], vec![]]);
    }

    #[test]
    fn test_write_prepends_length() {
        let (pipeline, _, wire) = setup(DEFAULT_MAX_FRAME_LENGTH);
        let reply = pipeline.write(Message::Bytes(Bytes::from_static(&[1, 2, 3])));
        assert!(reply.result().unwrap().is_ok());
        assert_eq!(*wire.sent.lock(), vec![vec![0, 0, 0, 3, 1, 2, 3]]);
    }

    #[test]
    fn test_oversized_prefix_corrupts_connection() {
        let (pipeline, collector, _) = setup(16);
        read(&pipeline, &[0, 0, 0, 17, 1, 2]);
        read(&pipeline, &[0, 0, 0, 1, 5]);
        assert!(collector.messages.lock().is_empty());
        assert_eq!(
            *collector.errors.lock(),
            vec![
                Error::FramingCorruption { length: 17 },
                Error::FramingCorruption { length: 17 }
            ]
        );

        // A new connection starts clean.
        pipeline.fire_inactive();
        read(&pipeline, &[0, 0, 0, 1, 5]);
        assert_eq!(*collector.messages.lock(), vec![vec![5]]);

        assert!(matches!(
            pipeline
                .write(Message::Bytes(Bytes::from(vec![0u8; 17])))
                .result(),
            Some(Err(Error::FramingCorruption { length: 17 }))
        ));
    }

    /// Closes the connection when it reads a frame starting with `0xff`.
    #[derive(Default)]
    struct Closer {
        pipeline: Mutex<Weak<Pipeline>>,
        messages: Mutex<Vec<Vec<u8>>>,
    }

    impl Handler for Closer {
        fn on_read(&self, _ctx: &HandlerContext, message: Message) -> Result<(), Error> {
            if let Message::Bytes(bytes) = message {
                let close = bytes.first() == Some(&0xff);
                self.messages.lock().push(bytes.to_vec());
                if close {
                    if let Some(pipeline) = self.pipeline.lock().upgrade() {
                        pipeline.fire_inactive();
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_read_handler_can_close_the_connection() {
        let closer = Arc::new(Closer::default());
        let pipeline = Arc::new(Pipeline::new());
        *closer.pipeline.lock() = Arc::downgrade(&pipeline);
        pipeline.add_last("app", closer.clone()).unwrap();
        pipeline
            .add_last("framer", Arc::new(LengthFieldFramer::default()))
            .unwrap();

        // The close discards the partial header that follows the frame.
        read(&pipeline, &[0, 0, 0, 1, 0xff, 0, 0]);
        read(&pipeline, &[0, 0, 0, 1, 9]);
        assert_eq!(*closer.messages.lock(), vec![vec![0xff], vec![9]]);
    }

    fn chunked(
        messages: &[Vec<u8>],
        cuts: &[usize],
    ) -> Vec<Vec<u8>> {
        let framer = LengthFieldFramer::default();
        let stream: Vec<u8> = messages
            .iter()
            .flat_map(|message| framer.frame(message).unwrap().to_vec())
            .collect();
        let mut chunks = Vec::new();
        let mut start = 0;
        for cut in cuts.iter().cycle() {
            if start >= stream.len() {
                break;
            }
            let end = (start + cut).min(stream.len());
            chunks.push(stream[start..end].to_vec());
            start = end;
        }
        chunks
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_reassembly_is_chunk_invariant(
            messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..65536), 0..6),
            cuts in prop::collection::vec(1usize..4096, 1..16),
        ) {
            let (pipeline, collector, _) = setup(DEFAULT_MAX_FRAME_LENGTH);
            for chunk in chunked(&messages, &cuts) {
                read(&pipeline, &chunk);
            }
            let received = collector.messages.lock().clone();
            prop_assert_eq!(received, messages);
            prop_assert!(collector.errors.lock().is_empty());
        }
    }
}
