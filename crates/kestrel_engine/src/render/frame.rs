//! Host-facing per-frame input and draw planning
//!
//! The host builds a [`FramePacket`] by value each frame: one camera
//! transform plus the renderable instances grouped by model. Grouping is
//! what turns many entities into one instanced draw per model.

use slotmap::new_key_type;

use crate::render::camera::Transform3;
use crate::render::vulkan::uniform::MAX_MODEL_INSTANCES;
use crate::render::vulkan::RenderError;

new_key_type! {
    /// Handle to a model registered with the engine
    pub struct ModelHandle;
}

/// All instances of one model to draw this frame
#[derive(Debug, Clone)]
pub struct InstanceGroup {
    /// The model shared by every instance in the group
    pub model: ModelHandle,
    /// Per-instance transforms, in draw order
    pub transforms: Vec<Transform3>,
}

/// Everything the engine needs to render one frame, passed by value
#[derive(Debug, Clone, Default)]
pub struct FramePacket {
    /// Camera transform for this frame
    pub camera: Transform3,
    /// Renderable instances grouped by model
    pub groups: Vec<InstanceGroup>,
}

impl FramePacket {
    /// Packet with a camera and no instances yet
    pub fn new(camera: Transform3) -> Self {
        Self {
            camera,
            groups: Vec::new(),
        }
    }
}

/// One planned instanced draw call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedDraw {
    /// Index of the source group in the packet
    pub group: usize,
    /// Instance count for the single draw call
    pub instance_count: u32,
}

/// Plan one instanced draw per non-empty group. Groups above the fixed
/// uniform-array ceiling are rejected rather than truncated.
pub fn plan_draws(groups: &[InstanceGroup]) -> Result<Vec<PlannedDraw>, RenderError> {
    let mut plan = Vec::with_capacity(groups.len());
    for (group, instances) in groups.iter().enumerate() {
        let count = instances.transforms.len();
        if count == 0 {
            continue;
        }
        if count > MAX_MODEL_INSTANCES {
            return Err(RenderError::TooManyInstances {
                count,
                max: MAX_MODEL_INSTANCES,
            });
        }
        plan.push(PlannedDraw {
            group,
            instance_count: count as u32,
        });
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_of(count: usize) -> InstanceGroup {
        InstanceGroup {
            model: ModelHandle::default(),
            transforms: vec![Transform3::default(); count],
        }
    }

    #[test]
    fn one_instanced_draw_per_model_with_the_group_size() {
        let plan = plan_draws(&[group_of(3)]).unwrap();
        assert_eq!(
            plan,
            [PlannedDraw {
                group: 0,
                instance_count: 3
            }]
        );
    }

    #[test]
    fn empty_groups_are_skipped() {
        let plan = plan_draws(&[group_of(0), group_of(2)]).unwrap();
        assert_eq!(
            plan,
            [PlannedDraw {
                group: 1,
                instance_count: 2
            }]
        );
    }

    #[test]
    fn the_instance_ceiling_is_enforced() {
        let plan = plan_draws(&[group_of(MAX_MODEL_INSTANCES)]);
        assert!(plan.is_ok());

        let over = plan_draws(&[group_of(MAX_MODEL_INSTANCES + 1)]);
        assert!(matches!(
            over,
            Err(RenderError::TooManyInstances { count, max })
                if count == MAX_MODEL_INSTANCES + 1 && max == MAX_MODEL_INSTANCES
        ));
    }

    #[test]
    fn group_order_is_preserved() {
        let plan = plan_draws(&[group_of(1), group_of(4), group_of(2)]).unwrap();
        let order: Vec<usize> = plan.iter().map(|draw| draw.group).collect();
        assert_eq!(order, [0, 1, 2]);
    }
}
