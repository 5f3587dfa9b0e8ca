//! Pipeline state descriptions, fingerprints and the pipeline cache.
//!
//! A pipeline state object is an opaque backend handle built from three
//! inputs: the root signature (binding contract), a compiled program (bytes
//! plus a binding table) and the output description (target formats). The
//! cache is keyed by an xxh3-64 fingerprint over length-prefixed encodings of
//! the three, so two descriptions that serialize identically share one PSO.
//!
//! ```text
//! fingerprint = xxh3_64( len | root-signature bytes
//!                      | len | program bytes
//!                      | len | output bytes )
//! ```

use std::collections::HashMap;

use xxhash_rust::xxh3::Xxh3;

use crate::backend::{Backend, RawPipeline};
use crate::error::GraphicsError;
use crate::sync::{GpuObject, ReleaseSink};
use crate::types::{DescriptorHeapType, TextureFormat};

/// Which pipeline a root signature or table binding applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum BindPoint {
    #[default]
    Graphics = 0,
    Compute = 1,
}

/// One root parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootParameter {
    /// A range of `len` descriptors in a shader-visible heap.
    DescriptorTable { heap_type: DescriptorHeapType, len: u32 },
    /// A constant buffer bound by GPU address.
    ConstantBufferView,
    /// `count` 32-bit values stored inline in the root signature.
    Constants { count: u32 },
}

/// Binding contract between shaders and command lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RootSignatureDesc {
    pub label: Option<String>,
    pub parameters: Vec<RootParameter>,
}

impl RootSignatureDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_table(mut self, heap_type: DescriptorHeapType, len: u32) -> Self {
        self.parameters
            .push(RootParameter::DescriptorTable { heap_type, len });
        self
    }

    pub fn with_constant_buffer(mut self) -> Self {
        self.parameters.push(RootParameter::ConstantBufferView);
        self
    }

    pub fn with_constants(mut self, count: u32) -> Self {
        self.parameters.push(RootParameter::Constants { count });
        self
    }

    /// Identity of the binding layout; the label is not part of it.
    pub fn fingerprint(&self) -> PipelineFingerprint {
        let mut bytes = Vec::new();
        self.encode(&mut bytes);
        fingerprint_parts(&[&bytes])
    }

    /// Root parameter at `index`, if declared.
    pub fn parameter(&self, index: u32) -> Option<&RootParameter> {
        self.parameters.get(index as usize)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        for parameter in &self.parameters {
            match *parameter {
                RootParameter::DescriptorTable { heap_type, len } => {
                    out.push(0);
                    out.push(heap_type.index() as u8);
                    out.extend_from_slice(&len.to_le_bytes());
                }
                RootParameter::ConstantBufferView => out.push(1),
                RootParameter::Constants { count } => {
                    out.push(2);
                    out.extend_from_slice(&count.to_le_bytes());
                }
            }
        }
    }
}

/// Maps a shader binding name to a root parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramBinding {
    pub name: String,
    pub root_index: u32,
}

/// A compiled shader program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ProgramBlob {
    pub bytecode: Vec<u8>,
    pub bindings: Vec<ProgramBinding>,
}

impl ProgramBlob {
    pub fn new(bytecode: impl Into<Vec<u8>>) -> Self {
        Self {
            bytecode: bytecode.into(),
            bindings: Vec::new(),
        }
    }

    pub fn with_binding(mut self, name: impl Into<String>, root_index: u32) -> Self {
        self.bindings.push(ProgramBinding {
            name: name.into(),
            root_index,
        });
        self
    }

    /// Root parameter bound to `name`.
    pub fn binding(&self, name: &str) -> Option<u32> {
        self.bindings
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.root_index)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.bytecode.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.bytecode);
        for binding in &self.bindings {
            out.extend_from_slice(&(binding.name.len() as u64).to_le_bytes());
            out.extend_from_slice(binding.name.as_bytes());
            out.extend_from_slice(&binding.root_index.to_le_bytes());
        }
    }
}

/// Render target formats a graphics pipeline writes to.
///
/// Compute pipelines use the default (no targets).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OutputDesc {
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub sample_count: u32,
}

impl OutputDesc {
    pub fn new() -> Self {
        Self {
            sample_count: 1,
            ..Self::default()
        }
    }

    pub fn with_color(mut self, format: TextureFormat) -> Self {
        self.color_formats.push(format);
        self
    }

    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.color_formats.len() as u8);
        for format in &self.color_formats {
            out.extend_from_slice(&(*format as u32).to_le_bytes());
        }
        match self.depth_format {
            Some(format) => {
                out.push(1);
                out.extend_from_slice(&(format as u32).to_le_bytes());
            }
            None => out.push(0),
        }
        out.extend_from_slice(&self.sample_count.to_le_bytes());
    }
}

/// Everything needed to build a pipeline state object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PipelineStateDesc {
    pub root_signature: RootSignatureDesc,
    pub program: ProgramBlob,
    pub output: OutputDesc,
}

/// 64-bit digest identifying a pipeline state description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PipelineFingerprint(pub u64);

impl PipelineStateDesc {
    pub fn new(root_signature: RootSignatureDesc, program: ProgramBlob, output: OutputDesc) -> Self {
        Self {
            root_signature,
            program,
            output,
        }
    }

    pub fn fingerprint(&self) -> PipelineFingerprint {
        let mut root = Vec::new();
        self.root_signature.encode(&mut root);
        let mut program = Vec::new();
        self.program.encode(&mut program);
        let mut output = Vec::new();
        self.output.encode(&mut output);
        fingerprint_parts(&[&root, &program, &output])
    }
}

/// Fingerprint of pre-encoded parts, each hashed with its length first.
pub fn fingerprint_parts(parts: &[&[u8]]) -> PipelineFingerprint {
    let mut hasher = Xxh3::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    PipelineFingerprint(hasher.digest())
}

/// A pipeline handed out by [`PipelineCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CachedPipeline {
    pub fingerprint: PipelineFingerprint,
    pub raw: RawPipeline,
}

/// Pipeline states keyed by fingerprint.
///
/// Pipelines live until the cache is cleared or dropped; they are then
/// released through the deferred-release sink.
#[derive(Debug)]
pub struct PipelineCache {
    pipelines: HashMap<PipelineFingerprint, RawPipeline>,
    sink: ReleaseSink,
    hits: u64,
    misses: u64,
}

impl PipelineCache {
    pub fn new(sink: ReleaseSink) -> Self {
        Self {
            pipelines: HashMap::new(),
            sink,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get_or_create(
        &mut self,
        backend: &dyn Backend,
        desc: &PipelineStateDesc,
    ) -> Result<CachedPipeline, GraphicsError> {
        let fingerprint = desc.fingerprint();
        if let Some(&raw) = self.pipelines.get(&fingerprint) {
            self.hits += 1;
            return Ok(CachedPipeline { fingerprint, raw });
        }
        let raw = backend.create_pipeline_state(desc)?;
        log::debug!(
            "created pipeline {raw} ({:016x}) for {}",
            fingerprint.0,
            desc.root_signature.label.as_deref().unwrap_or("<unnamed>")
        );
        self.misses += 1;
        self.pipelines.insert(fingerprint, raw);
        Ok(CachedPipeline { fingerprint, raw })
    }

    pub fn get(&self, fingerprint: PipelineFingerprint) -> Option<RawPipeline> {
        self.pipelines.get(&fingerprint).copied()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn hit_stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn clear(&mut self) {
        for (_, raw) in self.pipelines.drain() {
            self.sink.push(GpuObject::Pipeline(raw));
        }
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn desc() -> PipelineStateDesc {
        PipelineStateDesc::new(
            RootSignatureDesc::new()
                .with_label("lit")
                .with_table(DescriptorHeapType::CbvSrvUav, 4)
                .with_table(DescriptorHeapType::Sampler, 1)
                .with_constant_buffer(),
            ProgramBlob::new(vec![0xde, 0xad, 0xbe, 0xef]).with_binding("g_albedo", 0),
            OutputDesc::new()
                .with_color(TextureFormat::Rgba8Unorm)
                .with_depth(TextureFormat::Depth32Float),
        )
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(desc().fingerprint(), desc().fingerprint());
    }

    #[test]
    fn test_fingerprint_depends_on_every_part() {
        let base = desc().fingerprint();

        let mut other = desc();
        other.output.sample_count = 4;
        assert_ne!(other.fingerprint(), base);

        let mut other = desc();
        other.program.bytecode.push(0);
        assert_ne!(other.fingerprint(), base);

        let mut other = desc();
        other.root_signature.parameters.pop();
        assert_ne!(other.fingerprint(), base);
    }

    #[test]
    fn test_length_prefix_separates_parts() {
        let a = fingerprint_parts(&[b"ab", b"c"]);
        let b = fingerprint_parts(&[b"a", b"bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_cache_reuses_pipeline() {
        let backend = DummyBackend::new();
        let sink = ReleaseSink::new();
        let mut cache = PipelineCache::new(sink.clone());

        let first = cache.get_or_create(&backend, &desc()).unwrap();
        let second = cache.get_or_create(&backend, &desc()).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.hit_stats(), (1, 1));
        assert_eq!(backend.stats().pipelines_created, 1);

        drop(cache);
        assert_eq!(sink.take(), vec![GpuObject::Pipeline(first.raw)]);
    }

    #[test]
    fn test_empty_program_fails() {
        let backend = DummyBackend::new();
        let mut cache = PipelineCache::new(ReleaseSink::new());
        let mut bad = desc();
        bad.program.bytecode.clear();
        assert!(cache.get_or_create(&backend, &bad).is_err());
        assert!(cache.is_empty());
    }
}
