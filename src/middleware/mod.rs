//! HTTP middleware for the Feedmill server

pub mod auth;
