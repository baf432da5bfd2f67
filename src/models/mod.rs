// Data models for the video app REST API

pub mod auth;
pub mod video;

pub use auth::{AuthResponse, AuthTokens, LoginRequest, SignupRequest, UserInfo, UserProfile};
pub use video::{
    DashboardResponse, HealthStatus, MessageResponse, Pagination, StreamInfo, StreamSource,
    VideoSummary, WatchProgress,
};
