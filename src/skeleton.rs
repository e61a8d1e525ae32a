use crate::data::Description;
use crate::error::{LinkError, Result};
use crate::transform::UNIT_SCALE;
use log::*;
use serde::Serialize;
use std::collections::HashMap;

pub const SKELETON_DEF_TYPE: &str = "SKELETON_DEF";

/// Parent id the tracking server uses for root bones
pub const ROOT_PARENT_ID: i32 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub id: i32,
    pub name: String,
    pub parent_id: i32,
    pub rest_position: [f64; 3],
    pub rest_rotation: [f64; 4],
    pub rest_scale: [f64; 3],
}

/// Bone hierarchy and bind pose of one model description.
///
/// Immutable once built. A new description produces a new model that replaces
/// this one as a whole.
#[derive(Debug, Clone, Default)]
pub struct SkeletonModel {
    bones: Vec<Bone>,
    id_to_index: HashMap<i32, usize>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BindPose {
    pub positions: Vec<[f64; 3]>,
    pub rotations: Vec<[f64; 4]>,
    pub scales: Vec<[f64; 3]>,
}

/// Static skeleton record handed to consumers before any animation
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SkeletonDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub bone_names: Vec<String>,
    /// Index into `bone_names`, `-1` for roots and unknown parents
    pub parents: Vec<i32>,
    pub bind_pose: BindPose,
}

impl SkeletonModel {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a model from every skeleton of a description.
    ///
    /// Rest positions are multiplied by `position_scale`, rest scale is always
    /// unit since the tracking server streams none. Bone ids must be unique
    /// across the whole description.
    pub fn build(description: &Description, position_scale: f64) -> Result<Self> {
        let mut bones: Vec<Bone> = Vec::with_capacity(description.bone_count());
        let mut id_to_index: HashMap<i32, usize> = HashMap::with_capacity(description.bone_count());

        for skeleton in &description.skeletons {
            debug!(
                "Skeleton {} has {} bones",
                skeleton.name,
                skeleton.bones.len()
            );
            for bone in &skeleton.bones {
                if let Some(&existing) = id_to_index.get(&bone.id) {
                    return Err(LinkError::DuplicateBoneId {
                        id: bone.id,
                        first: bones[existing].name.clone(),
                        second: bone.name.clone(),
                    });
                }
                trace!("Mapping bone id {} -> {}", bone.id, bone.name);
                id_to_index.insert(bone.id, bones.len());
                let [x, y, z] = bone.position;
                bones.push(Bone {
                    id: bone.id,
                    name: bone.name.clone(),
                    parent_id: bone.parent_id,
                    rest_position: [x * position_scale, y * position_scale, z * position_scale],
                    rest_rotation: bone.rotation,
                    rest_scale: UNIT_SCALE,
                });
            }
        }

        Ok(Self { bones, id_to_index })
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn index_of(&self, bone_id: i32) -> Option<usize> {
        self.id_to_index.get(&bone_id).copied()
    }

    pub fn bone(&self, bone_id: i32) -> Option<&Bone> {
        self.index_of(bone_id).map(|index| &self.bones[index])
    }

    pub fn name_of(&self, bone_id: i32) -> Option<&str> {
        self.bone(bone_id).map(|bone| bone.name.as_str())
    }

    /// Parent index of every bone, `-1` when the parent is a root marker or
    /// is not part of this model
    pub fn parent_indices(&self) -> Vec<i32> {
        self.bones
            .iter()
            .map(|bone| match self.index_of(bone.parent_id) {
                Some(index) if bone.parent_id != ROOT_PARENT_ID => index as i32,
                _ => ROOT_PARENT_ID,
            })
            .collect()
    }

    pub fn definition(&self) -> SkeletonDefinition {
        SkeletonDefinition {
            kind: SKELETON_DEF_TYPE.to_owned(),
            bone_names: self.bones.iter().map(|bone| bone.name.clone()).collect(),
            parents: self.parent_indices(),
            bind_pose: BindPose {
                positions: self.bones.iter().map(|bone| bone.rest_position).collect(),
                rotations: self.bones.iter().map(|bone| bone.rest_rotation).collect(),
                scales: self.bones.iter().map(|bone| bone.rest_scale).collect(),
            },
        }
    }
}

impl SkeletonDefinition {
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
