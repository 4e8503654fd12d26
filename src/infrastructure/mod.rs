//! 基础设施层（Infrastructure）
//!
//! 持有外部资源（PDF 渲染工具、会话目录），只向上暴露能力。

pub mod rasterizer;
pub mod session_store;

pub use rasterizer::{ImageDirRasterizer, PageImage, PageRasterizer, PdftoppmRasterizer};
pub use session_store::SessionStore;
