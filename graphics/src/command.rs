//! Minimal command recording used by direct mesh rendering.

use std::sync::Arc;

use crate::resources::Buffer;

/// Receives the commands of a direct mesh draw.
pub trait CommandRecorder {
    fn bind_index_buffer(&mut self, buffer: &Arc<Buffer>, use_16bit: bool);
    fn bind_vertex_buffers(&mut self, buffers: &[Arc<Buffer>], offsets: &[u32]);
    fn draw_indexed(&mut self, indices_count: u32, start_index: u32, base_vertex: i32);
}

/// A recorded command.
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    BindIndexBuffer {
        buffer: Arc<Buffer>,
        use_16bit: bool,
    },
    BindVertexBuffers {
        buffers: Vec<Arc<Buffer>>,
        offsets: Vec<u32>,
    },
    DrawIndexed {
        indices_count: u32,
        start_index: u32,
        base_vertex: i32,
    },
}

/// Recorder that stores commands in order.
#[derive(Debug, Default)]
pub struct RecordedCommands {
    pub commands: Vec<RecordedCommand>,
}

impl RecordedCommands {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandRecorder for RecordedCommands {
    fn bind_index_buffer(&mut self, buffer: &Arc<Buffer>, use_16bit: bool) {
        self.commands.push(RecordedCommand::BindIndexBuffer {
            buffer: Arc::clone(buffer),
            use_16bit,
        });
    }

    fn bind_vertex_buffers(&mut self, buffers: &[Arc<Buffer>], offsets: &[u32]) {
        self.commands.push(RecordedCommand::BindVertexBuffers {
            buffers: buffers.to_vec(),
            offsets: offsets.to_vec(),
        });
    }

    fn draw_indexed(&mut self, indices_count: u32, start_index: u32, base_vertex: i32) {
        self.commands.push(RecordedCommand::DrawIndexed {
            indices_count,
            start_index,
            base_vertex,
        });
    }
}
