//! Resource barriers.

use crate::backend::RawResource;
use crate::types::ResourceState;

/// Which half of a split transition a barrier is.
///
/// A split transition lets the GPU start a state change right after the
/// last use and finish it just before the next one, overlapping the
/// transition with unrelated work in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BarrierSplit {
    #[default]
    None,
    BeginOnly,
    EndOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceBarrier {
    Transition {
        resource: RawResource,
        before: ResourceState,
        after: ResourceState,
        split: BarrierSplit,
    },
    /// Orders UAV accesses; `None` applies to every UAV.
    Uav { resource: Option<RawResource> },
    Aliasing {
        before: Option<RawResource>,
        after: Option<RawResource>,
    },
}

impl ResourceBarrier {
    pub fn transition(resource: RawResource, before: ResourceState, after: ResourceState) -> Self {
        Self::Transition {
            resource,
            before,
            after,
            split: BarrierSplit::None,
        }
    }

    pub fn uav(resource: RawResource) -> Self {
        Self::Uav {
            resource: Some(resource),
        }
    }

    /// The resource the barrier applies to, if it names one.
    pub fn resource(&self) -> Option<RawResource> {
        match *self {
            Self::Transition { resource, .. } => Some(resource),
            Self::Uav { resource } => resource,
            Self::Aliasing { after, before } => after.or(before),
        }
    }

    /// Target state of a transition; `None` for UAV and aliasing barriers.
    pub fn after_state(&self) -> Option<ResourceState> {
        match *self {
            Self::Transition { after, .. } => Some(after),
            _ => None,
        }
    }

    pub fn split(&self) -> BarrierSplit {
        match *self {
            Self::Transition { split, .. } => split,
            _ => BarrierSplit::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let barrier = ResourceBarrier::transition(
            RawResource(3),
            ResourceState::RENDER_TARGET,
            ResourceState::PIXEL_SHADER_RESOURCE,
        );
        assert_eq!(barrier.resource(), Some(RawResource(3)));
        assert_eq!(barrier.after_state(), Some(ResourceState::PIXEL_SHADER_RESOURCE));
        assert_eq!(barrier.split(), BarrierSplit::None);

        let uav = ResourceBarrier::Uav { resource: None };
        assert_eq!(uav.resource(), None);
        assert_eq!(uav.after_state(), None);
    }
}
