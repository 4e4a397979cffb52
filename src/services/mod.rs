pub mod blender;
pub mod collaborative;
pub mod content;
pub mod filter;
pub mod model_cache;
pub mod providers;
pub mod recommendations;
pub mod retry;
pub mod virtual_user;
