//! Mutation commands and their single-line wire grammar.
//!
//! ```text
//! add <icon> <x> <y> <z> <pinned> <color> <title...>
//! modify <index> <color> <icon> <pinned> <title...>
//! remove <index>
//! ```
//!
//! Index-addressed commands are coupled to the peer's ordering at the moment
//! they are dispatched. Nothing here checks that an index still points at the
//! record the caller meant; [`RecordRef::Id`] narrows that window by resolving
//! against the freshest snapshot right before the line is sent.
//!
//! Identifiers of new records are assigned here, on the sending side. The add
//! grammar has no field for them, so they travel next to the line through
//! [`crate::Transport::send_create`].

use std::fmt;
use std::str::FromStr;

use crate::error::{CommandEncodeError, CommandParseError};
use crate::record::{SavedWaypoints, WaypointDraft, WaypointId, WorldPos};

/// Addresses an existing record for modify/remove.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordRef {
	/// Position in the authoritative ordering, sent as-is.
	Index(usize),
	/// Stable identifier, resolved to an index at dispatch time.
	Id(WaypointId),
}

impl RecordRef {
	/// Resolves to a wire index against `saved`.
	///
	/// Index targets are passed through unchecked; id targets yield `None`
	/// when the record is no longer present.
	pub fn resolve(&self, saved: &SavedWaypoints) -> Option<usize> {
		match self {
			Self::Index(idx) => Some(*idx),
			Self::Id(id) => saved.index_of(id),
		}
	}
}

impl From<usize> for RecordRef {
	fn from(idx: usize) -> Self {
		Self::Index(idx)
	}
}

impl From<WaypointId> for RecordRef {
	fn from(id: WaypointId) -> Self {
		Self::Id(id)
	}
}

impl fmt::Display for RecordRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Index(idx) => write!(f, "#{idx}"),
			Self::Id(id) => write!(f, "id:{id}"),
		}
	}
}

/// One structural change to the authoritative collection. Immutable once built.
///
/// Re-sending the same `Add` creates a second record; deduplication happens
/// before a command is built, never here.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationCommand {
	Add {
		/// Identifier assigned to the record this command creates.
		id: WaypointId,
		position: WorldPos,
		draft: WaypointDraft,
	},
	Modify { target: RecordRef, draft: WaypointDraft },
	Remove { target: RecordRef },
}

impl MutationCommand {
	/// Creates a record under a freshly minted identifier.
	pub fn add(position: WorldPos, draft: WaypointDraft) -> Self {
		Self::add_as(WaypointId::generate(), position, draft)
	}

	/// Creates a record under an identifier the caller already holds, as when
	/// importing records exported elsewhere.
	pub fn add_as(id: WaypointId, position: WorldPos, draft: WaypointDraft) -> Self {
		Self::Add { id, position, draft }
	}

	pub fn modify(target: impl Into<RecordRef>, draft: WaypointDraft) -> Self {
		Self::Modify {
			target: target.into(),
			draft,
		}
	}

	pub fn remove(target: impl Into<RecordRef>) -> Self {
		Self::Remove { target: target.into() }
	}

	pub const fn verb(&self) -> &'static str {
		match self {
			Self::Add { .. } => "add",
			Self::Modify { .. } => "modify",
			Self::Remove { .. } => "remove",
		}
	}

	pub fn target(&self) -> Option<&RecordRef> {
		match self {
			Self::Add { .. } => None,
			Self::Modify { target, .. } | Self::Remove { target } => Some(target),
		}
	}

	/// Identifier of the record an `Add` creates.
	pub fn created_id(&self) -> Option<&WaypointId> {
		match self {
			Self::Add { id, .. } => Some(id),
			_ => None,
		}
	}

	/// Encodes this command as one outbound line.
	///
	/// Fails when the icon is not exactly one token, or when an id target
	/// cannot be found in `saved`.
	pub fn to_wire(&self, saved: &SavedWaypoints) -> Result<String, CommandEncodeError> {
		let line = match self {
			Self::Add { position, draft, .. } => {
				check_icon(&draft.icon)?;
				with_title(
					format!(
						"add {} {} {} {} {} {}",
						draft.icon, position.x, position.y, position.z, draft.pinned, draft.color
					),
					&draft.title,
				)
			}
			Self::Modify { target, draft } => {
				check_icon(&draft.icon)?;
				let idx = resolve(target, saved)?;
				with_title(format!("modify {idx} {} {} {}", draft.color, draft.icon, draft.pinned), &draft.title)
			}
			Self::Remove { target } => format!("remove {}", resolve(target, saved)?),
		};
		Ok(line)
	}

	/// Decodes one outbound line.
	///
	/// Targets always decode as [`RecordRef::Index`]. An add line carries no
	/// identifier, so `created` supplies the one its sender assigned; without
	/// it a fresh one is minted.
	pub fn decode(line: &str, created: Option<WaypointId>) -> Result<Self, CommandParseError> {
		let (verb, mut rest) = next_token(line).ok_or(CommandParseError::Empty)?;
		match verb {
			"add" => {
				let icon = take(&mut rest, "icon")?.to_string();
				let x = take_num(&mut rest, "x")?;
				let y = take_num(&mut rest, "y")?;
				let z = take_num(&mut rest, "z")?;
				let pinned = take_bool(&mut rest, "pinned")?;
				let color = take_num(&mut rest, "color")?;
				Ok(Self::Add {
					id: created.unwrap_or_else(WaypointId::generate),
					position: WorldPos::new(x, y, z),
					draft: WaypointDraft {
						title: title_of(rest),
						icon,
						color,
						pinned,
					},
				})
			}
			"modify" => {
				let idx = take_num(&mut rest, "index")?;
				let color = take_num(&mut rest, "color")?;
				let icon = take(&mut rest, "icon")?.to_string();
				let pinned = take_bool(&mut rest, "pinned")?;
				Ok(Self::Modify {
					target: RecordRef::Index(idx),
					draft: WaypointDraft {
						title: title_of(rest),
						icon,
						color,
						pinned,
					},
				})
			}
			"remove" => {
				let idx = take_num(&mut rest, "index")?;
				if !rest.trim().is_empty() {
					return Err(CommandParseError::Trailing(rest.trim().to_string()));
				}
				Ok(Self::Remove {
					target: RecordRef::Index(idx),
				})
			}
			other => Err(CommandParseError::UnknownVerb(other.to_string())),
		}
	}
}

fn check_icon(icon: &str) -> Result<(), CommandEncodeError> {
	if icon.is_empty() {
		return Err(CommandEncodeError::EmptyIcon);
	}
	if icon.contains(char::is_whitespace) {
		return Err(CommandEncodeError::IconWhitespace(icon.to_string()));
	}
	Ok(())
}

fn resolve(target: &RecordRef, saved: &SavedWaypoints) -> Result<usize, CommandEncodeError> {
	target.resolve(saved).ok_or_else(|| CommandEncodeError::Unresolved(target.clone()))
}

fn with_title(mut head: String, title: &str) -> String {
	if !title.is_empty() {
		head.push(' ');
		head.extend(title.chars().map(|c| if c == '\n' || c == '\r' { ' ' } else { c }));
	}
	head
}

fn next_token(input: &str) -> Option<(&str, &str)> {
	let input = input.trim_start();
	if input.is_empty() {
		return None;
	}
	let end = input.find(char::is_whitespace).unwrap_or(input.len());
	Some((&input[..end], &input[end..]))
}

fn take<'a>(rest: &mut &'a str, field: &'static str) -> Result<&'a str, CommandParseError> {
	let (tok, tail) = next_token(rest).ok_or(CommandParseError::MissingField(field))?;
	*rest = tail;
	Ok(tok)
}

fn take_num<T: FromStr>(rest: &mut &str, field: &'static str) -> Result<T, CommandParseError> {
	let tok = take(rest, field)?;
	tok.parse().map_err(|_| CommandParseError::InvalidNumber {
		field,
		value: tok.to_string(),
	})
}

fn take_bool(rest: &mut &str, field: &'static str) -> Result<bool, CommandParseError> {
	match take(rest, field)? {
		"true" => Ok(true),
		"false" => Ok(false),
		other => Err(CommandParseError::InvalidBool {
			field,
			value: other.to_string(),
		}),
	}
}

fn title_of(rest: &str) -> String {
	rest.strip_prefix(' ').unwrap_or(rest).to_string()
}

impl FromStr for MutationCommand {
	type Err = CommandParseError;

	/// Decodes one outbound line, minting an identifier for add lines.
	fn from_str(line: &str) -> Result<Self, Self::Err> {
		Self::decode(line, None)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::record::{PeerId, Waypoint};

	fn saved_with(ids: &[&str]) -> SavedWaypoints {
		SavedWaypoints::new(
			ids.iter()
				.map(|id| {
					Waypoint::from_draft(
						WaypointId::new(*id),
						WorldPos::new(0.0, 0.0, 0.0),
						WaypointDraft::new(*id, "circle", 0, false),
						PeerId::new("peer"),
					)
				})
				.collect(),
		)
	}

	#[test]
	fn add_line_follows_grammar() {
		let cmd = MutationCommand::add(WorldPos::new(512.5, 110.0, -64.0), WaypointDraft::new("Home base", "home", -16776961, true));
		assert_eq!(cmd.to_wire(&SavedWaypoints::default()).as_deref(), Ok("add home 512.5 110 -64 true -16776961 Home base"));
	}

	#[test]
	fn modify_and_remove_lines_follow_grammar() {
		let saved = SavedWaypoints::default();
		let modify = MutationCommand::modify(3, WaypointDraft::new("Ore vein", "pick", 255, false));
		assert_eq!(modify.to_wire(&saved).as_deref(), Ok("modify 3 255 pick false Ore vein"));
		assert_eq!(MutationCommand::remove(7).to_wire(&saved).as_deref(), Ok("remove 7"));
	}

	#[test]
	fn empty_title_has_no_trailing_space() {
		let cmd = MutationCommand::modify(0, WaypointDraft::new("", "x", 1, false));
		assert_eq!(cmd.to_wire(&SavedWaypoints::default()).as_deref(), Ok("modify 0 1 x false"));
	}

	#[test]
	fn newlines_in_titles_stay_on_one_line() {
		let cmd = MutationCommand::add(WorldPos::new(0.0, 0.0, 0.0), WaypointDraft::new("a\nb", "x", 0, false));
		let line = cmd.to_wire(&SavedWaypoints::default()).unwrap();
		assert!(!line.contains('\n'));
		assert!(line.ends_with("a b"));
	}

	#[test]
	fn id_targets_resolve_against_snapshot() {
		let saved = saved_with(&["a", "b", "c"]);
		let cmd = MutationCommand::remove(WaypointId::new("c"));
		assert_eq!(cmd.to_wire(&saved).as_deref(), Ok("remove 2"));

		let gone = MutationCommand::remove(WaypointId::new("zz"));
		assert_eq!(gone.to_wire(&saved), Err(CommandEncodeError::Unresolved(RecordRef::Id(WaypointId::new("zz")))));
	}

	#[test]
	fn index_targets_are_not_bounds_checked() {
		let saved = saved_with(&["a"]);
		assert_eq!(MutationCommand::remove(9).to_wire(&saved).as_deref(), Ok("remove 9"));
	}

	#[test]
	fn decodes_what_it_encodes() {
		let saved = SavedWaypoints::default();
		let cmds = [
			MutationCommand::add(WorldPos::new(1.25, -3.0, 7.0), WaypointDraft::new("two  spaces", "flag", 42, false)),
			MutationCommand::modify(4, WaypointDraft::new("renamed", "star", -1, true)),
			MutationCommand::remove(11),
		];
		for cmd in cmds {
			let line = cmd.to_wire(&saved).unwrap();
			assert_eq!(MutationCommand::decode(&line, cmd.created_id().cloned()), Ok(cmd), "line: {line}");
		}
	}

	#[test]
	fn adds_carry_a_client_assigned_id() {
		let draft = WaypointDraft::new("Camp", "tent", 0, false);
		let first = MutationCommand::add(WorldPos::new(0.0, 0.0, 0.0), draft.clone());
		let second = MutationCommand::add(WorldPos::new(0.0, 0.0, 0.0), draft.clone());
		assert_ne!(first.created_id(), second.created_id());

		let imported = MutationCommand::add_as(WaypointId::new("x3"), WorldPos::new(0.0, 0.0, 0.0), draft);
		assert_eq!(imported.created_id(), Some(&WaypointId::new("x3")));
		assert_eq!(MutationCommand::remove(0).created_id(), None);
	}

	#[test]
	fn icons_must_be_a_single_token() {
		let saved = SavedWaypoints::default();
		let empty = MutationCommand::modify(0, WaypointDraft::new("true story", "", 5, false));
		assert_eq!(empty.to_wire(&saved), Err(CommandEncodeError::EmptyIcon));

		let spaced = MutationCommand::add(WorldPos::new(1.0, 2.0, 3.0), WaypointDraft::new("Camp", "big flag", 0, false));
		assert_eq!(spaced.to_wire(&saved), Err(CommandEncodeError::IconWhitespace("big flag".into())));

		let tabbed = MutationCommand::modify(0, WaypointDraft::new("Camp", "a\tb", 0, false));
		assert!(matches!(tabbed.to_wire(&saved), Err(CommandEncodeError::IconWhitespace(_))));
	}

	#[test]
	fn rejects_malformed_lines() {
		assert_eq!("".parse::<MutationCommand>(), Err(CommandParseError::Empty));
		assert_eq!("teleport 1".parse::<MutationCommand>(), Err(CommandParseError::UnknownVerb("teleport".into())));
		assert_eq!("remove".parse::<MutationCommand>(), Err(CommandParseError::MissingField("index")));
		assert_eq!(
			"remove two".parse::<MutationCommand>(),
			Err(CommandParseError::InvalidNumber {
				field: "index",
				value: "two".into()
			})
		);
		assert_eq!(
			"add x 1 2 3 yes 0 t".parse::<MutationCommand>(),
			Err(CommandParseError::InvalidBool {
				field: "pinned",
				value: "yes".into()
			})
		);
		assert_eq!("remove 1 2".parse::<MutationCommand>(), Err(CommandParseError::Trailing("2".into())));
	}
}
