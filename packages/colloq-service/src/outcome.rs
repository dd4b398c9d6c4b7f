use crate::Degradation;

/// Result of a best-effort pipeline stage.
#[derive(Clone, Debug, PartialEq)]
pub enum StageOutcome<T> {
	Ok(T),
	/// The stage fell back; `value` is what the fallback produced.
	Degraded { value: T, reason: Degradation },
	/// The stage ran normally and found nothing.
	Empty,
}
impl<T> StageOutcome<T> {
	pub fn degradation(&self) -> Option<&Degradation> {
		match self {
			Self::Degraded { reason, .. } => Some(reason),
			Self::Ok(_) | Self::Empty => None,
		}
	}

	pub fn is_degraded(&self) -> bool {
		matches!(self, Self::Degraded { .. })
	}

	pub fn is_empty(&self) -> bool {
		matches!(self, Self::Empty)
	}

	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
		match self {
			Self::Ok(value) => StageOutcome::Ok(f(value)),
			Self::Degraded { value, reason } => StageOutcome::Degraded { value: f(value), reason },
			Self::Empty => StageOutcome::Empty,
		}
	}

	/// Splits the outcome into its value and the degradation, if any.
	pub fn into_parts(self) -> (T, Option<Degradation>)
	where
		T: Default,
	{
		match self {
			Self::Ok(value) => (value, None),
			Self::Degraded { value, reason } => (value, Some(reason)),
			Self::Empty => (T::default(), None),
		}
	}
}
