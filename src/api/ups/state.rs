//! The Unified Procedure Step lifecycle.
//!
//! The transition table is a pure function over the state enum so it can be
//! exhaustively tested without storage. Mutations of a stored workitem are
//! serialized per UID through [`WorkitemLocks`].

use crate::types::UI;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Procedure Step State (0074,1000).
///
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part04/chapter_CC.html#sect_CC.1.1>
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcedureStepState {
	#[serde(rename = "SCHEDULED")]
	Scheduled,
	#[serde(rename = "IN PROGRESS")]
	InProgress,
	#[serde(rename = "COMPLETED")]
	Completed,
	#[serde(rename = "CANCELED")]
	Canceled,
}

impl ProcedureStepState {
	/// COMPLETED and CANCELED are terminal: no transition leaves them.
	pub const fn is_final(self) -> bool {
		matches!(self, Self::Completed | Self::Canceled)
	}

	/// The four legal transitions. Everything else, including any state to
	/// itself, is illegal.
	pub const fn can_transition(self, target: Self) -> bool {
		matches!(
			(self, target),
			(Self::Scheduled, Self::InProgress)
				| (Self::Scheduled, Self::Canceled)
				| (Self::InProgress, Self::Completed)
				| (Self::InProgress, Self::Canceled)
		)
	}
}

impl Display for ProcedureStepState {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Scheduled => write!(f, "SCHEDULED"),
			Self::InProgress => write!(f, "IN PROGRESS"),
			Self::Completed => write!(f, "COMPLETED"),
			Self::Canceled => write!(f, "CANCELED"),
		}
	}
}

impl FromStr for ProcedureStepState {
	type Err = UnknownTermError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"SCHEDULED" => Ok(Self::Scheduled),
			"IN PROGRESS" => Ok(Self::InProgress),
			"COMPLETED" => Ok(Self::Completed),
			"CANCELED" => Ok(Self::Canceled),
			_ => Err(UnknownTermError { term: s.to_owned() }),
		}
	}
}

/// Scheduled Procedure Step Priority (0074,1200).
/// STAT outranks HIGH outranks MEDIUM outranks LOW.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkitemPriority {
	#[serde(rename = "LOW")]
	Low,
	#[serde(rename = "MEDIUM")]
	Medium,
	#[serde(rename = "HIGH")]
	High,
	#[serde(rename = "STAT")]
	Stat,
}

impl Default for WorkitemPriority {
	fn default() -> Self {
		Self::Medium
	}
}

impl Display for WorkitemPriority {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Low => write!(f, "LOW"),
			Self::Medium => write!(f, "MEDIUM"),
			Self::High => write!(f, "HIGH"),
			Self::Stat => write!(f, "STAT"),
		}
	}
}

impl FromStr for WorkitemPriority {
	type Err = UnknownTermError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"LOW" => Ok(Self::Low),
			"MEDIUM" => Ok(Self::Medium),
			"HIGH" => Ok(Self::High),
			"STAT" => Ok(Self::Stat),
			_ => Err(UnknownTermError { term: s.to_owned() }),
		}
	}
}

#[derive(Debug, thiserror::Error)]
#[error("unknown coded term `{term}`")]
pub struct UnknownTermError {
	pub term: String,
}

/// A keyed mutex map serializing mutations per workitem UID.
///
/// Mutations of distinct workitems proceed independently; two state changes
/// on the same workitem are linearized so that exactly one wins a given
/// transition and the other observes the new state's rules.
#[derive(Debug, Clone, Default)]
pub struct WorkitemLocks {
	map: Arc<Mutex<HashMap<UI, Arc<Mutex<()>>>>>,
}

impl WorkitemLocks {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn acquire(&self, uid: &str) -> OwnedMutexGuard<()> {
		let handle = {
			let mut map = self.map.lock().await;
			map.entry(uid.to_owned()).or_default().clone()
		};
		handle.lock_owned().await
	}

	/// Drops the lock entry for a deleted workitem.
	pub async fn remove(&self, uid: &str) {
		self.map.lock().await.remove(uid);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ProcedureStepState::{Canceled, Completed, InProgress, Scheduled};

	#[test]
	fn transition_table_is_exact() {
		let legal = [
			(Scheduled, InProgress),
			(Scheduled, Canceled),
			(InProgress, Completed),
			(InProgress, Canceled),
		];

		for from in [Scheduled, InProgress, Completed, Canceled] {
			for to in [Scheduled, InProgress, Completed, Canceled] {
				assert_eq!(
					from.can_transition(to),
					legal.contains(&(from, to)),
					"transition {from} -> {to}"
				);
			}
		}
	}

	#[test]
	fn terminal_states() {
		assert!(!Scheduled.is_final());
		assert!(!InProgress.is_final());
		assert!(Completed.is_final());
		assert!(Canceled.is_final());
	}

	#[test]
	fn priority_ordering() {
		assert!(WorkitemPriority::Stat > WorkitemPriority::High);
		assert!(WorkitemPriority::High > WorkitemPriority::Medium);
		assert!(WorkitemPriority::Medium > WorkitemPriority::Low);
	}

	#[test]
	fn coded_terms_roundtrip() {
		for state in [Scheduled, InProgress, Completed, Canceled] {
			assert_eq!(state.to_string().parse::<ProcedureStepState>().unwrap(), state);
		}
		for priority in [
			WorkitemPriority::Low,
			WorkitemPriority::Medium,
			WorkitemPriority::High,
			WorkitemPriority::Stat,
		] {
			assert_eq!(
				priority.to_string().parse::<WorkitemPriority>().unwrap(),
				priority
			);
		}
	}

	#[tokio::test]
	async fn locks_serialize_per_uid() {
		let locks = WorkitemLocks::new();

		let guard = locks.acquire("1.2.3").await;
		// A second acquire on the same UID must wait...
		let same = locks.acquire("1.2.3");
		tokio::pin!(same);
		assert!(futures::poll!(same.as_mut()).is_pending());

		// ...while a different UID proceeds immediately.
		let _other = locks.acquire("4.5.6").await;

		drop(guard);
		assert!(futures::poll!(same).is_ready());
	}
}
