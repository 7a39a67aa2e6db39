#![no_std]

// Library target so the loader can name this crate as a build-dependency.
// The programs live in the `port-gate-ebpf` binary.
