//! Wire-name <-> local-type resolution for the message bus.
//!
//! The source resolves message types by CLR reflection; there is no runtime
//! type reflection in Rust, so this resolver works off `TypeId` plus a
//! registered name, which plays the same role within one process (see
//! `DESIGN.md`).

use std::any::{type_name, TypeId};

use dashmap::DashMap;

/// Maps wire type names to `TypeId`s and back.
///
/// A user-supplied override (`register::<T>(name)`) takes precedence over
/// the default name, which is `std::any::type_name::<T>()` -- stable within
/// a process, analogous to the source's `"<fullName>, <assemblyName>"`.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    name_overrides: DashMap<TypeId, String>,
    by_name: DashMap<String, TypeId>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an explicit wire name for `T`, overriding the default.
    pub fn register<T: 'static>(&self, name: impl Into<String>) {
        let id = TypeId::of::<T>();
        let name = name.into();
        self.name_overrides.insert(id, name.clone());
        self.by_name.insert(name, id);
    }

    /// Resolves the wire name for `T`: the registered override if present,
    /// else `std::any::type_name::<T>()`.
    #[must_use]
    pub fn name_from_type<T: 'static>(&self) -> String {
        let id = TypeId::of::<T>();
        if let Some(name) = self.name_overrides.get(&id) {
            return name.clone();
        }
        let default = type_name::<T>().to_string();
        self.by_name.entry(default.clone()).or_insert(id);
        default
    }

    /// Resolves a wire name back to a `TypeId`, if the type has been seen
    /// before (via `register` or a prior `name_from_type` call) or matches
    /// `std::any::type_name::<T>()` for some `T` the caller probes with
    /// [`Self::type_matches`].
    #[must_use]
    pub fn type_from_name(&self, name: &str) -> Option<TypeId> {
        if let Some(id) = self.by_name.get(name) {
            return Some(*id);
        }
        // Mirrors the source's fallback: strip a trailing version/culture/
        // token-style suffix (anything after the first comma) and retry.
        let stripped = name.split(',').next().unwrap_or(name);
        self.by_name.get(stripped).map(|id| *id)
    }

    /// `true` if `name` resolves to `T`'s `TypeId`.
    #[must_use]
    pub fn type_matches<T: 'static>(&self, name: &str) -> bool {
        self.type_from_name(name) == Some(TypeId::of::<T>())
            || name == type_name::<T>()
            || name == type_name::<T>().split(',').next().unwrap_or(name)
    }
}
