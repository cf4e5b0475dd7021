//! Registry trait for self-registering implementations.

/// Declares the configuration name and factory of an implementation.
///
/// Storage backends, account providers and delivery endpoints each expose a
/// `Registry` type implementing this trait, so the service can build its
/// factory maps without naming every implementation by hand.
pub trait ImplementationRegistry {
	/// Key of the implementation's table in the configuration, e.g.
	/// `storage.implementations.file` or `account.implementations.local`.
	const NAME: &'static str;

	/// Factory signature defined by the owning crate.
	type Factory;

	fn factory() -> Self::Factory;
}
