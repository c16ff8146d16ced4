// Route handlers. Everything except /health sits behind the JWT middleware.
pub mod explorer;
pub mod health;
pub mod plugins;
