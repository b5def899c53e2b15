use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Globally unique waypoint identifier.
///
/// Immutable once assigned. Ordering and equality are plain string ordering
/// and equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaypointId(String);

impl WaypointId {
	/// Wraps an existing identifier.
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	/// Mints a fresh random identifier.
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for WaypointId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Identifier of the peer that controls a waypoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for PeerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// World position of a waypoint.
///
/// Equality and hashing compare the exact bit patterns of the three
/// components, with `-0.0` folded onto `0.0`. Two NaN components with the
/// same payload compare equal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorldPos {
	pub x: f64,
	pub y: f64,
	pub z: f64,
}

impl WorldPos {
	pub const fn new(x: f64, y: f64, z: f64) -> Self {
		Self { x, y, z }
	}

	fn key(&self) -> [u64; 3] {
		[canonical_bits(self.x), canonical_bits(self.y), canonical_bits(self.z)]
	}
}

fn canonical_bits(v: f64) -> u64 {
	if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() }
}

impl PartialEq for WorldPos {
	fn eq(&self, other: &Self) -> bool {
		self.key() == other.key()
	}
}

impl Eq for WorldPos {}

impl Hash for WorldPos {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.key().hash(state);
	}
}

impl fmt::Display for WorldPos {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {} {}", self.x, self.y, self.z)
	}
}

/// The replaceable part of a waypoint.
///
/// Modification always supplies a complete draft; there is no per-field patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaypointDraft {
	pub title: String,
	/// Symbolic icon name. Must not contain whitespace.
	pub icon: String,
	/// Packed color value.
	pub color: i32,
	pub pinned: bool,
}

impl WaypointDraft {
	pub fn new(title: impl Into<String>, icon: impl Into<String>, color: i32, pinned: bool) -> Self {
		Self {
			title: title.into(),
			icon: icon.into(),
			color,
			pinned,
		}
	}
}

/// One authoritative waypoint record as mirrored from the remote peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
	pub id: WaypointId,
	pub position: WorldPos,
	pub title: String,
	pub icon: String,
	pub color: i32,
	pub pinned: bool,
	pub owner: PeerId,
}

impl Waypoint {
	/// Builds a record from a draft, keeping identity and ownership explicit.
	pub fn from_draft(id: WaypointId, position: WorldPos, draft: WaypointDraft, owner: PeerId) -> Self {
		Self {
			id,
			position,
			title: draft.title,
			icon: draft.icon,
			color: draft.color,
			pinned: draft.pinned,
			owner,
		}
	}

	/// Returns the replaceable fields of this record.
	pub fn draft(&self) -> WaypointDraft {
		WaypointDraft {
			title: self.title.clone(),
			icon: self.icon.clone(),
			color: self.color,
			pinned: self.pinned,
		}
	}

	/// Replaces every replaceable field at once. Identity, position and owner are kept.
	pub fn apply_draft(&mut self, draft: WaypointDraft) {
		self.title = draft.title;
		self.icon = draft.icon;
		self.color = draft.color;
		self.pinned = draft.pinned;
	}
}

/// Local mirror of the authoritative collection.
///
/// Only ever replaced wholesale, when the remote peer pushes a full snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavedWaypoints {
	records: Vec<Waypoint>,
}

impl SavedWaypoints {
	pub fn new(records: Vec<Waypoint>) -> Self {
		Self { records }
	}

	/// Replaces the whole mirror with a fresh snapshot.
	pub fn replace(&mut self, records: Vec<Waypoint>) {
		self.records = records;
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn get(&self, index: usize) -> Option<&Waypoint> {
		self.records.get(index)
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Waypoint> {
		self.records.iter()
	}

	pub fn as_slice(&self) -> &[Waypoint] {
		&self.records
	}

	/// Returns the current position of `id` in the authoritative ordering.
	pub fn index_of(&self, id: &WaypointId) -> Option<usize> {
		self.records.iter().position(|rec| &rec.id == id)
	}

	pub fn contains_id(&self, id: &WaypointId) -> bool {
		self.index_of(id).is_some()
	}

	/// Ascending indices of every record matching `pred`.
	pub fn matching_indices(&self, mut pred: impl FnMut(&Waypoint) -> bool) -> Vec<usize> {
		self.records
			.iter()
			.enumerate()
			.filter_map(|(idx, rec)| pred(rec).then_some(idx))
			.collect()
	}
}

impl<'a> IntoIterator for &'a SavedWaypoints {
	type Item = &'a Waypoint;
	type IntoIter = std::slice::Iter<'a, Waypoint>;

	fn into_iter(self) -> Self::IntoIter {
		self.records.iter()
	}
}
