use crate::data::Frame;
use crate::skeleton::SkeletonModel;
use crate::transform::{compose, TransformMatrix, UNIT_SCALE};
use log::*;
use std::sync::{Arc, RwLock};

/// Local transforms of every bone in one frame, in the order the bones were
/// streamed. Never modified after construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameSnapshot {
    bone_ids: Vec<i32>,
    matrices: Vec<TransformMatrix>,
}

impl FrameSnapshot {
    /// Convert every bone pose of `frame`, scaling positions by
    /// `position_scale`. Bones the model does not know are kept.
    pub fn convert(frame: &Frame, model: &SkeletonModel, position_scale: f64) -> Self {
        let mut bone_ids = Vec::new();
        let mut matrices = Vec::new();
        for bone in frame.bones() {
            if model.index_of(bone.id).is_none() {
                debug!("Frame bone {} is not part of the current skeleton", bone.id);
            }
            let [x, y, z] = bone.position;
            let position = [x * position_scale, y * position_scale, z * position_scale];
            bone_ids.push(bone.id);
            matrices.push(compose(position, bone.rotation, UNIT_SCALE));
        }
        Self { bone_ids, matrices }
    }

    pub fn bone_ids(&self) -> &[i32] {
        &self.bone_ids
    }

    pub fn matrices(&self) -> &[TransformMatrix] {
        &self.matrices
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &TransformMatrix)> {
        self.bone_ids.iter().copied().zip(self.matrices.iter())
    }

    pub fn matrix_for(&self, bone_id: i32) -> Option<&TransformMatrix> {
        self.bone_ids
            .iter()
            .position(|&id| id == bone_id)
            .map(|index| &self.matrices[index])
    }

    /// World transform of every model bone, indexed like the model.
    ///
    /// A bone gets `None` when it, or any bone on its parent chain, is
    /// missing from this frame.
    pub fn world_transforms(&self, model: &SkeletonModel) -> Vec<Option<TransformMatrix>> {
        let parents = model.parent_indices();
        let mut world: Vec<Option<TransformMatrix>> = vec![None; model.len()];
        let mut resolved = vec![false; model.len()];

        for start in 0..model.len() {
            // walk up to the first resolved ancestor, then resolve back down
            let mut chain = Vec::new();
            let mut cursor = Some(start);
            while let Some(index) = cursor {
                if resolved[index] || chain.contains(&index) {
                    break;
                }
                chain.push(index);
                cursor = usize_parent(parents[index]);
            }
            for &index in chain.iter().rev() {
                let local = self.matrix_for(model.bones()[index].id);
                world[index] = match (usize_parent(parents[index]), local) {
                    (_, None) => None,
                    (None, Some(local)) => Some(*local),
                    (Some(parent), Some(local)) if resolved[parent] => {
                        world[parent].map(|parent_world| parent_world * local)
                    }
                    // parent cycle
                    (Some(_), Some(_)) => None,
                };
                resolved[index] = true;
            }
        }
        world
    }
}

fn usize_parent(parent: i32) -> Option<usize> {
    if parent < 0 {
        None
    } else {
        Some(parent as usize)
    }
}

/// Latest converted frame, shared between the stream callback and readers.
///
/// Writers build a whole [`FrameSnapshot`] and swap it in; readers clone the
/// `Arc` and keep a consistent snapshot for as long as they hold it.
#[derive(Debug, Default)]
pub struct FrameCache {
    current: RwLock<Arc<FrameSnapshot>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, snapshot: FrameSnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut current) => *current = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    pub fn snapshot(&self) -> Arc<FrameSnapshot> {
        match self.current.read() {
            Ok(current) => Arc::clone(&*current),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    pub fn clear(&self) {
        self.replace(FrameSnapshot::default());
    }
}
