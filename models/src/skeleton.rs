//! Skeleton hierarchy, bones and retargeting rules of skinned models.

use std::sync::Arc;

use redlilium_core::Guid;
use redlilium_core::math::{Mat4, Transform};

use crate::error::{AssetError, AssetResult};
use crate::serialization::{NODE_NAME_MAX, ReadStream, WriteStream};

const MAX_NODES: usize = u16::MAX as usize;
const MAX_BONES: usize = 256;
const MAX_RETARGETS: usize = 1024;

/// One node of the skeleton hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonNode {
    pub name: String,
    /// `-1` for roots.
    pub parent_index: i32,
    pub local_transform: Transform,
}

impl SkeletonNode {
    pub fn new(name: impl Into<String>, parent_index: i32, local_transform: Transform) -> Self {
        Self {
            name: name.into(),
            parent_index,
            local_transform,
        }
    }
}

/// Skinning bone bound to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonBone {
    pub parent_index: i32,
    pub node_index: i32,
    pub local_transform: Transform,
    /// Inverse bind pose: model space to the bone's bind space.
    pub offset_matrix: Mat4,
}

impl SkeletonBone {
    pub fn new(node_index: i32) -> Self {
        Self {
            parent_index: -1,
            node_index,
            local_transform: Transform::identity(),
            offset_matrix: Mat4::identity(),
        }
    }
}

/// Node hierarchy plus the bones used for skinning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Skeleton {
    pub nodes: Vec<SkeletonNode>,
    pub bones: Vec<SkeletonBone>,
}

impl Skeleton {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the node called `name`, case-sensitive.
    pub fn find_node(&self, name: &str) -> i32 {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map_or(-1, |i| i as i32)
    }

    /// Index of the node called `name` ignoring ASCII case, as used by retargeting.
    pub fn find_node_ignore_case(&self, name: &str) -> i32 {
        self.nodes
            .iter()
            .position(|n| n.name.eq_ignore_ascii_case(name))
            .map_or(-1, |i| i as i32)
    }

    /// Index of the bone driven by `node_index`.
    pub fn find_bone(&self, node_index: i32) -> i32 {
        self.bones
            .iter()
            .position(|b| b.node_index == node_index)
            .map_or(-1, |i| i as i32)
    }

    fn parent_of(&self, index: usize) -> Option<usize> {
        usize::try_from(self.nodes.get(index)?.parent_index).ok()
    }

    /// Model-space matrix of a node, composed from the root down.
    pub fn node_transform(&self, index: usize) -> Mat4 {
        let mut matrix = Mat4::identity();
        let mut current = Some(index);
        let mut guard = 0;
        while let Some(i) = current {
            let Some(node) = self.nodes.get(i) else {
                break;
            };
            matrix = node.local_transform.to_matrix() * matrix;
            current = self.parent_of(i);
            guard += 1;
            if guard > self.nodes.len() {
                log::error!("Skeleton node {index} has a cyclic parent chain");
                break;
            }
        }
        matrix
    }

    /// Set a node's local transform so its model-space matrix becomes `world`.
    pub fn set_node_transform(&mut self, index: usize, world: &Mat4) {
        let parent = self
            .parent_of(index)
            .map_or_else(Mat4::identity, |p| self.node_transform(p));
        let local = parent.try_inverse().unwrap_or_else(Mat4::identity) * world;
        if let Some(node) = self.nodes.get_mut(index) {
            node.local_transform = Transform::from_matrix(&local);
        }
    }

    /// Model-space matrices of every node in bind pose.
    pub fn bind_pose(&self) -> Vec<Mat4> {
        let mut out: Vec<Mat4> = Vec::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            let local = node.local_transform.to_matrix();
            let world = match self.parent_of(i) {
                Some(p) if p < i => out[p] * local,
                Some(_) => self.node_transform(i),
                None => local,
            };
            out.push(world);
        }
        out
    }

    /// Recompute every bone's offset matrix as the inverse of its node's bind pose.
    pub fn compute_offset_matrices(&mut self) {
        let pose = self.bind_pose();
        for bone in &mut self.bones {
            let world = usize::try_from(bone.node_index)
                .ok()
                .and_then(|i| pose.get(i))
                .copied()
                .unwrap_or_else(Mat4::identity);
            bone.offset_matrix = world.try_inverse().unwrap_or_else(|| {
                log::warn!("Bone of node {} has a singular bind pose", bone.node_index);
                Mat4::identity()
            });
        }
    }

    /// Skinning palette for node matrices in model space: `node * offset` per bone.
    pub fn skinning_palette(&self, node_pose: &[Mat4]) -> Vec<Mat4> {
        self.bones
            .iter()
            .map(|bone| {
                let node = usize::try_from(bone.node_index)
                    .ok()
                    .and_then(|i| node_pose.get(i))
                    .copied()
                    .unwrap_or_else(Mat4::identity);
                node * bone.offset_matrix
            })
            .collect()
    }

    /// Check parent links and bone targets.
    pub fn validate(&self) -> AssetResult<()> {
        let count = self.nodes.len() as i32;
        for (i, node) in self.nodes.iter().enumerate() {
            if node.parent_index < -1 || node.parent_index >= count || node.parent_index == i as i32 {
                return Err(AssetError::InvalidData(format!(
                    "node '{}' has invalid parent {}",
                    node.name, node.parent_index
                )));
            }
        }
        let bone_count = self.bones.len() as i32;
        for (i, bone) in self.bones.iter().enumerate() {
            if bone.node_index < 0 || bone.node_index >= count {
                return Err(AssetError::InvalidData(format!(
                    "bone {i} references node {} of {count}",
                    bone.node_index
                )));
            }
            if bone.parent_index < -1 || bone.parent_index >= bone_count {
                return Err(AssetError::InvalidData(format!(
                    "bone {i} has invalid parent {}",
                    bone.parent_index
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn write(&self, stream: &mut WriteStream) {
        stream.write_i32(self.nodes.len() as i32);
        for node in &self.nodes {
            stream.write_i32(node.parent_index);
            stream.write_transform(&node.local_transform);
            stream.write_string(&node.name, NODE_NAME_MAX);
        }
        stream.write_i32(self.bones.len() as i32);
        for bone in &self.bones {
            stream.write_i32(bone.parent_index);
            stream.write_i32(bone.node_index);
            stream.write_transform(&bone.local_transform);
            stream.write_matrix(&bone.offset_matrix);
        }
    }

    pub(crate) fn read(stream: &mut ReadStream<'_>) -> AssetResult<Self> {
        let node_count = stream.read_count(MAX_NODES)?;
        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let parent_index = stream.read_i32()?;
            let local_transform = stream.read_transform()?;
            let name = stream.read_string(NODE_NAME_MAX)?;
            nodes.push(SkeletonNode {
                name,
                parent_index,
                local_transform,
            });
        }
        let bone_count = stream.read_count(MAX_BONES)?;
        let mut bones = Vec::with_capacity(bone_count);
        for _ in 0..bone_count {
            bones.push(SkeletonBone {
                parent_index: stream.read_i32()?,
                node_index: stream.read_i32()?,
                local_transform: stream.read_transform()?,
                offset_matrix: stream.read_matrix()?,
            });
        }
        let skeleton = Self { nodes, bones };
        skeleton.validate()?;
        Ok(skeleton)
    }
}

/// Manual retargeting rule for one source asset.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonRetarget {
    pub source_asset: Guid,
    /// Skeleton whose node names the mapping targets; empty maps straight into the source.
    pub reference_skeleton: Guid,
    /// This skeleton's node name to the reference node name.
    pub node_mapping: Vec<(String, String)>,
}

impl SkeletonRetarget {
    pub fn new(source_asset: Guid, reference_skeleton: Guid) -> Self {
        Self {
            source_asset,
            reference_skeleton,
            node_mapping: Vec::new(),
        }
    }

    pub fn with_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.node_mapping.push((from.into(), to.into()));
        self
    }

    pub fn mapped_name(&self, node: &str) -> Option<&str> {
        self.node_mapping
            .iter()
            .find(|(from, _)| from == node)
            .map(|(_, to)| to.as_str())
    }

    pub(crate) fn write_all(retargets: &[SkeletonRetarget], stream: &mut WriteStream) {
        stream.write_i32(retargets.len() as i32);
        for r in retargets {
            stream.write_guid(&r.source_asset);
            stream.write_guid(&r.reference_skeleton);
            stream.write_string_pairs(&r.node_mapping, NODE_NAME_MAX);
        }
    }

    pub(crate) fn read_all(stream: &mut ReadStream<'_>) -> AssetResult<Vec<SkeletonRetarget>> {
        let count = stream.read_count(MAX_RETARGETS)?;
        (0..count)
            .map(|_| {
                Ok(SkeletonRetarget {
                    source_asset: stream.read_guid()?,
                    reference_skeleton: stream.read_guid()?,
                    node_mapping: stream.read_string_pairs(NODE_NAME_MAX)?,
                })
            })
            .collect()
    }
}

/// Per-node mapping from a target skeleton into a source's nodes or channels.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonMapping {
    pub target_skeleton: Guid,
    pub source: Guid,
    /// For each target node, the source node or channel index driving it, or `-1`.
    pub node_mapping: Arc<[i32]>,
}

impl SkeletonMapping {
    pub fn empty(target_skeleton: Guid, source: Guid) -> Self {
        Self {
            target_skeleton,
            source,
            node_mapping: Arc::from([]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.node_mapping.is_empty()
    }

    pub fn mapped_count(&self) -> usize {
        self.node_mapping.iter().filter(|&&i| i >= 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redlilium_core::math::{Vec3, quat_from_rotation_z, transform_point};
    use std::f32::consts::FRAC_PI_2;

    fn arm() -> Skeleton {
        Skeleton {
            nodes: vec![
                SkeletonNode::new("Root", -1, Transform::identity()),
                SkeletonNode::new(
                    "Shoulder",
                    0,
                    Transform::new(Vec3::new(0.0, 1.0, 0.0), quat_from_rotation_z(FRAC_PI_2), Vec3::repeat(1.0)),
                ),
                SkeletonNode::new("Hand", 1, Transform::from_translation(Vec3::new(1.0, 0.0, 0.0))),
            ],
            bones: vec![SkeletonBone::new(1), SkeletonBone::new(2)],
        }
    }

    #[test]
    fn node_lookup_is_case_sensitive() {
        let skeleton = arm();
        assert_eq!(skeleton.find_node("Hand"), 2);
        assert_eq!(skeleton.find_node("hand"), -1);
        assert_eq!(skeleton.find_node_ignore_case("hand"), 2);
        assert_eq!(skeleton.find_bone(2), 1);
        assert_eq!(skeleton.find_bone(0), -1);
    }

    #[test]
    fn node_transform_walks_parents() {
        let skeleton = arm();
        let hand = transform_point(&skeleton.node_transform(2), &Vec3::zeros());
        assert!((hand - Vec3::new(0.0, 2.0, 0.0)).norm() < 1e-5);
        let pose = skeleton.bind_pose();
        assert!((pose[2] - skeleton.node_transform(2)).norm() < 1e-5);
    }

    #[test]
    fn set_node_transform_inverts_chain() {
        let mut skeleton = arm();
        let target = Mat4::new_translation(&Vec3::new(3.0, 4.0, 5.0));
        skeleton.set_node_transform(2, &target);
        assert!((skeleton.node_transform(2) - target).norm() < 1e-4);
    }

    #[test]
    fn offsets_invert_bind_pose() {
        let mut skeleton = arm();
        skeleton.compute_offset_matrices();
        let palette = skeleton.skinning_palette(&skeleton.bind_pose());
        for m in palette {
            assert!((m - Mat4::identity()).norm() < 1e-5);
        }
    }

    #[test]
    fn serialization_roundtrip() {
        let mut skeleton = arm();
        skeleton.compute_offset_matrices();
        let retargets = vec![SkeletonRetarget::new(Guid::from_u128(5), Guid::EMPTY).with_mapping("Hand", "hand_r")];
        let mut out = WriteStream::new();
        skeleton.write(&mut out);
        SkeletonRetarget::write_all(&retargets, &mut out);
        let bytes = out.into_bytes();
        let mut stream = ReadStream::new(&bytes);
        assert_eq!(Skeleton::read(&mut stream).unwrap(), skeleton);
        assert_eq!(SkeletonRetarget::read_all(&mut stream).unwrap(), retargets);
        assert!(stream.is_eof());
    }

    #[test]
    fn invalid_parent_is_rejected() {
        let mut skeleton = arm();
        skeleton.nodes[2].parent_index = 7;
        assert!(skeleton.validate().is_err());
    }
}
