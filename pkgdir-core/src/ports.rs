// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Pluggable boundary traits, mirroring the way the teacher repo keeps
//! `container::Container` and `config::Manager` as narrow, independently
//! substitutable collaborators rather than folding them into the
//! orchestrator. The HTTP router, templating, and forge adapters wired
//! against these traits live outside this crate.

use std::{future::Future, pin::Pin};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boxed-future signatures (rather than `async fn`) so this trait stays
/// object-safe: `pkgdir` wires a single `Arc<dyn ForgeAdapter>` through
/// `State`.
pub trait ForgeAdapter: Send + Sync {
    fn fetch_readme<'a>(&'a self, owner: &'a str, repo: &'a str) -> BoxFuture<'a, Option<String>>;
    fn fetch_tags<'a>(&'a self, owner: &'a str, repo: &'a str) -> BoxFuture<'a, Vec<String>>;
    fn fetch_trending<'a>(&'a self) -> BoxFuture<'a, Vec<String>>;
}

pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &str) -> bool;
}

pub trait MetricsSink: Send + Sync {
    fn gauge(&self, name: &str, value: f64);
    fn counter(&self, name: &str, delta: i64);
}

/// Default wiring for `pkgdir` when no metrics backend is configured.
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn gauge(&self, _name: &str, _value: f64) {}
    fn counter(&self, _name: &str, _delta: i64) {}
}

pub trait Watchdog: Send + Sync {
    fn ping(&self);
}

/// No-op watchdog used when `NOTIFY_SOCKET` isn't set.
pub struct NullWatchdog;

impl Watchdog for NullWatchdog {
    fn ping(&self) {}
}
