//! A single-user task list whose every change shows up at once.
//!
//! The [`coordinator::Coordinator`] applies each intent to the UI-visible
//! collection immediately, sends it to a [`store::Backend`], and either
//! reconciles with the stored record or rolls back to its snapshot.

pub mod cli;
pub mod coordinator;
pub mod io;
pub mod model;
pub mod store;
pub mod view;
