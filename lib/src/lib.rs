#![no_std]

pub mod klog;

pub use klog::{
    KlogLevel, klog_get_level, klog_is_enabled, klog_register_backend, klog_set_level,
};
