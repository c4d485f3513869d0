//! End-to-end tests for dtclink live under `tests/`.
