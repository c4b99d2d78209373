pub mod jwt;
pub mod oauth;

pub use jwt::JwtService;
pub use oauth::OAuthClient;
