use serde::{Deserialize, Serialize};

/// Rest pose of one bone as streamed in a model description
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct BoneDescription {
    pub id: i32,
    pub name: String,
    pub parent_id: i32,
    pub position: [f64; 3],
    /// `[x, y, z, w]`
    pub rotation: [f64; 4],
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SkeletonDescription {
    pub name: String,
    pub bones: Vec<BoneDescription>,
}

/// Every skeleton the tracking server currently knows about
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct Description {
    pub skeletons: Vec<SkeletonDescription>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct BonePose {
    pub id: i32,
    pub position: [f64; 3],
    /// `[x, y, z, w]`
    pub rotation: [f64; 4],
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SkeletonFrame {
    pub id: i32,
    pub bones: Vec<BonePose>,
}

/// Tracked poses for one mocap frame. Bones may be a subset of the description.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct Frame {
    pub skeletons: Vec<SkeletonFrame>,
}

impl Description {
    pub fn deserialize(data: &[u8]) -> Result<Description, serde_json::Error> {
        serde_json::from_slice::<Description>(data)
    }

    pub fn bone_count(&self) -> usize {
        self.skeletons.iter().map(|skeleton| skeleton.bones.len()).sum()
    }
}

impl Frame {
    pub fn deserialize(data: &[u8]) -> Result<Frame, serde_json::Error> {
        serde_json::from_slice::<Frame>(data)
    }

    /// Bone poses of all skeletons in the order they were streamed
    pub fn bones(&self) -> impl Iterator<Item = &BonePose> {
        self.skeletons.iter().flat_map(|skeleton| skeleton.bones.iter())
    }
}
