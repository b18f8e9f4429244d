//! Path and JSON body extractors that reject with `ApiError`
//!
//! axum's own extractors answer malformed input with a plain-text body;
//! these wrap them so every failure renders as `{"error": ...}`.

use axum::extract::{FromRequest, FromRequestParts};

use super::error::ApiError;

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
