//! Recorded commands and command lists.
//!
//! A [`CommandList`] is a plain vector of [`Command`] values. Recording never
//! touches the backend; the backend translates the whole list at
//! submission.

use super::barrier::ResourceBarrier;
use crate::backend::{RawDescriptorHeap, RawPipeline, RawResource};
use crate::descriptors::{CpuDescriptorHandle, GpuDescriptorHandle};
use crate::pipeline::{BindPoint, PipelineFingerprint};
use crate::types::{QueueType, ScissorRect, Viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBufferView {
    pub gpu_address: u64,
    pub size: u32,
    pub stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    U16,
    #[default]
    U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBufferView {
    pub gpu_address: u64,
    pub size: u32,
    pub format: IndexFormat,
}

/// A single recorded GPU command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ResourceBarrier(Vec<ResourceBarrier>),
    SetRenderTargets {
        colors: Vec<CpuDescriptorHandle>,
        depth: Option<CpuDescriptorHandle>,
    },
    ClearColorTarget {
        target: CpuDescriptorHandle,
        color: [f32; 4],
    },
    ClearDepthStencil {
        target: CpuDescriptorHandle,
        depth: f32,
        stencil: u8,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    SetPipelineState(RawPipeline),
    SetRootSignature {
        bind_point: BindPoint,
        signature: PipelineFingerprint,
    },
    SetDescriptorHeaps {
        views: Option<RawDescriptorHeap>,
        samplers: Option<RawDescriptorHeap>,
    },
    SetRootDescriptorTable {
        bind_point: BindPoint,
        root_index: u32,
        base: GpuDescriptorHandle,
    },
    SetRootConstantBufferView {
        bind_point: BindPoint,
        root_index: u32,
        gpu_address: u64,
    },
    SetRoot32BitConstants {
        bind_point: BindPoint,
        root_index: u32,
        offset: u32,
        values: Vec<u32>,
    },
    SetVertexBuffers {
        start_slot: u32,
        views: Vec<VertexBufferView>,
    },
    SetIndexBuffer(IndexBufferView),
    SetViewport(Viewport),
    SetScissorRect(ScissorRect),
    CopyBufferRegion {
        dst: RawResource,
        dst_offset: u64,
        src: RawResource,
        src_offset: u64,
        size: u64,
    },
    CopyResource {
        dst: RawResource,
        src: RawResource,
    },
    BeginEvent(String),
    EndEvent,
    SetMarker(String),
}

impl Command {
    /// Returns true for commands only a graphics queue can execute.
    pub fn is_graphics_only(&self) -> bool {
        matches!(
            self,
            Self::SetRenderTargets { .. }
                | Self::ClearColorTarget { .. }
                | Self::ClearDepthStencil { .. }
                | Self::Draw { .. }
                | Self::DrawIndexed { .. }
                | Self::SetVertexBuffers { .. }
                | Self::SetIndexBuffer(_)
                | Self::SetViewport(_)
                | Self::SetScissorRect(_)
                | Self::SetRootSignature {
                    bind_point: BindPoint::Graphics,
                    ..
                }
                | Self::SetRootDescriptorTable {
                    bind_point: BindPoint::Graphics,
                    ..
                }
                | Self::SetRootConstantBufferView {
                    bind_point: BindPoint::Graphics,
                    ..
                }
                | Self::SetRoot32BitConstants {
                    bind_point: BindPoint::Graphics,
                    ..
                }
        )
    }
}

/// An ordered list of commands for one queue.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandList {
    queue: QueueType,
    label: Option<String>,
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new(queue: QueueType) -> Self {
        Self {
            queue,
            label: None,
            commands: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    pub fn push(&mut self, command: Command) {
        log::trace!("record {:?}", command);
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop all commands, keeping the allocation for reuse.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.label = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphics_only_classification() {
        assert!(
            Command::Draw {
                vertex_count: 3,
                instance_count: 1,
                start_vertex: 0,
                start_instance: 0
            }
            .is_graphics_only()
        );
        assert!(!Command::Dispatch { x: 1, y: 1, z: 1 }.is_graphics_only());
        assert!(
            !Command::SetRoot32BitConstants {
                bind_point: BindPoint::Compute,
                root_index: 0,
                offset: 0,
                values: vec![1],
            }
            .is_graphics_only()
        );
        assert!(!Command::BeginEvent("x".into()).is_graphics_only());
    }

    #[test]
    fn test_list_clear_keeps_queue() {
        let mut list = CommandList::new(QueueType::Compute).with_label("culling");
        list.push(Command::Dispatch { x: 8, y: 1, z: 1 });
        assert_eq!(list.len(), 1);
        assert_eq!(list.label(), Some("culling"));

        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.label(), None);
        assert_eq!(list.queue(), QueueType::Compute);
    }
}
