//! End-to-end tests driving the full manager path with a scripted
//! transport.
