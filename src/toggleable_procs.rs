//! Stand-in for the source system's `@on`/`@off`/`@proc` toggleable
//! procedure mechanism (§1 "deliberately out of scope", §9: "modeled
//! abstractly as a build-time flag"). Gated behind the `toggleable-procs`
//! feature; no rule-body behavior lives behind it, since the mechanism
//! itself is out of scope and only its on/off nature is represented here.

/// Whether toggleable-procedure support is compiled into this binary.
pub const ENABLED: bool = true;
