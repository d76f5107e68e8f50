//! Merkle commitment over proposal components and selective disclosure
//!
//! Each component is a leaf `H(0x00 || nonce || group || bytes)`; inner nodes are
//! `H(0x01 || left || right)`. The tree is padded with zero hashes up to a power of two. The
//! nonce is derived from the proposal's private salt, so a party holding only a partial view can
//! neither recompute nor guess the hidden leaves.
use crate::error::AttestationError;
use crate::identity::Party;
use crate::proposal::{Command, CommandComponent, Component, ComponentGroup, WireProposal};
use crate::utils::SecureHash;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// A disclosed component, with its leaf position and nonce so the receiver can rebuild the leaf.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct DisclosedComponent {
    #[n(0)]
    pub position: u32,
    #[n(1)]
    pub nonce: SecureHash,
    #[n(2)]
    pub component: Component,
}

/// The sub-view of a proposal shown to a party that must not see the rest.
#[derive(Debug, Clone, PartialEq, Eq, Default, minicbor::Encode, minicbor::Decode)]
pub struct PartialView {
    #[n(0)]
    pub components: Vec<DisclosedComponent>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct AuditPath {
    #[n(0)]
    pub position: u32,
    #[n(1)]
    pub siblings: Vec<SecureHash>, // bottom-up
}

/// Witness that every disclosed component sits at its claimed position under the root.
#[derive(Debug, Clone, PartialEq, Eq, Default, minicbor::Encode, minicbor::Decode)]
pub struct InclusionProof {
    #[n(0)]
    pub leaf_count: u32,
    #[n(1)]
    pub paths: Vec<AuditPath>,
}

pub fn leaf_hash(nonce: &SecureHash, component: &Component) -> SecureHash {
    SecureHash::of_parts(&[
        &[LEAF_PREFIX],
        nonce.as_bytes(),
        &[component.group as u8],
        &component.bytes,
    ])
}

fn node_hash(left: &SecureHash, right: &SecureHash) -> SecureHash {
    SecureHash::of_parts(&[&[NODE_PREFIX], left.as_bytes(), right.as_bytes()])
}

// Every level of the padded tree, leaves first, root last.
fn tree_levels(leaves: &[SecureHash]) -> Vec<Vec<SecureHash>> {
    let width = leaves.len().max(1).next_power_of_two();
    let mut level = leaves.to_vec();
    level.resize(width, SecureHash::ZERO);

    let mut levels = vec![level];
    while levels[levels.len() - 1].len() > 1 {
        let next = levels[levels.len() - 1]
            .chunks(2)
            .map(|pair| node_hash(&pair[0], &pair[1]))
            .collect();
        levels.push(next);
    }
    levels
}

pub fn merkle_root(leaves: &[SecureHash]) -> SecureHash {
    if leaves.is_empty() {
        return SecureHash::ZERO;
    }
    let levels = tree_levels(leaves);
    levels[levels.len() - 1][0]
}

fn audit_path(levels: &[Vec<SecureHash>], position: usize) -> Vec<SecureHash> {
    let mut siblings = Vec::with_capacity(levels.len().saturating_sub(1));
    let mut index = position;
    for level in &levels[..levels.len() - 1] {
        siblings.push(level[index ^ 1]);
        index >>= 1;
    }
    siblings
}

/// Disclose the components selected by `keep`, with a proof binding them to the proposal root.
pub fn disclose_with<F>(proposal: &WireProposal, mut keep: F) -> (PartialView, InclusionProof)
where
    F: FnMut(&Component) -> bool,
{
    let leaves: Vec<SecureHash> = proposal
        .components
        .iter()
        .enumerate()
        .map(|(position, component)| leaf_hash(&proposal.nonce(position as u32), component))
        .collect();
    let levels = tree_levels(&leaves);

    let mut view = PartialView::default();
    let mut proof = InclusionProof {
        leaf_count: leaves.len() as u32,
        paths: vec![],
    };

    for (position, component) in proposal.components.iter().enumerate() {
        if !keep(component) {
            continue;
        }
        view.components.push(DisclosedComponent {
            position: position as u32,
            nonce: proposal.nonce(position as u32),
            component: component.clone(),
        });
        proof.paths.push(AuditPath {
            position: position as u32,
            siblings: audit_path(&levels, position),
        });
    }

    (view, proof)
}

/// Disclose only what `disclose_to` attests on: the `GoToDirect` command naming it as a signer.
pub fn disclose(proposal: &WireProposal, disclose_to: &Party) -> (PartialView, InclusionProof) {
    disclose_with(proposal, |component| {
        if component.group != ComponentGroup::Command {
            return false;
        }
        match CommandComponent::from_bytes(&component.bytes) {
            Ok(cmd) => {
                matches!(cmd.command, Command::GoToDirect { .. })
                    && cmd.signers.contains(disclose_to)
            }
            Err(_) => false,
        }
    })
}

/// Check that every disclosed component resolves to `root`. An empty view never verifies.
pub fn verify_inclusion(view: &PartialView, proof: &InclusionProof, root: &SecureHash) -> bool {
    if view.components.is_empty() || view.components.len() != proof.paths.len() {
        return false;
    }
    if proof.leaf_count == 0 {
        return false;
    }
    let depth = (proof.leaf_count as usize).next_power_of_two().trailing_zeros() as usize;

    let mut last_position = None;
    for (disclosed, path) in view.components.iter().zip(&proof.paths) {
        if disclosed.position != path.position
            || disclosed.position >= proof.leaf_count
            || path.siblings.len() != depth
        {
            return false;
        }
        // positions strictly increasing, so no leaf is counted twice
        if last_position.is_some_and(|last| disclosed.position <= last) {
            return false;
        }
        last_position = Some(disclosed.position);

        let mut hash = leaf_hash(&disclosed.nonce, &disclosed.component);
        let mut index = disclosed.position;
        for sibling in &path.siblings {
            hash = if index & 1 == 0 {
                node_hash(&hash, sibling)
            } else {
                node_hash(sibling, &hash)
            };
            index >>= 1;
        }
        if hash != *root {
            return false;
        }
    }

    true
}

impl PartialView {
    /// Decode every disclosed command component. Fails if any disclosed component is not a
    /// decodable command.
    pub fn commands(&self) -> Result<Vec<CommandComponent>, AttestationError> {
        self.components
            .iter()
            .map(|d| {
                if d.component.group != ComponentGroup::Command {
                    return Err(AttestationError::AttestationRejected(format!(
                        "component at position {} is not a command",
                        d.position
                    )));
                }
                CommandComponent::from_bytes(&d.component.bytes)
                    .map_err(|e| AttestationError::AttestationRejected(e.to_string()))
            })
            .collect()
    }
}
