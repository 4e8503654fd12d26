//! 页面栅格化
//!
//! 把 PDF 渲染成逐页图片，是抽题阶段唯一的输入来源。
//! - `PdftoppmRasterizer`：调用 poppler 的 `pdfinfo` / `pdftoppm`
//! - `ImageDirRasterizer`：直接使用已经渲染好的 `page_N.png`

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::PipelineError;

static PAGE_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^page[_-]?0*(\d+)\.(png|jpe?g)$").expect("page file regex")
});

/// 一页图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page: u32,
    pub path: PathBuf,
}

impl PageImage {
    /// 读成 data URL 交给视觉模型
    pub async fn to_data_url(&self) -> Result<String, PipelineError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            PipelineError::Rasterize(format!("读取页面图片失败 {}: {}", self.path.display(), e))
        })?;
        let mime = match self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            _ => "image/png",
        };
        Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
    }
}

/// 栅格化能力
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// 总页数
    async fn page_count(&self) -> Result<u32, PipelineError>;

    /// 渲染指定页到 `out_dir`，按页码顺序返回
    async fn render(&self, pages: &[u32], out_dir: &Path) -> Result<Vec<PageImage>, PipelineError>;
}

/// poppler 命令行栅格化
pub struct PdftoppmRasterizer {
    pdf: PathBuf,
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(pdf: impl Into<PathBuf>, dpi: u32) -> Self {
        Self {
            pdf: pdf.into(),
            dpi,
        }
    }
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn page_count(&self) -> Result<u32, PipelineError> {
        let output = Command::new("pdfinfo")
            .arg(&self.pdf)
            .output()
            .await
            .map_err(|e| PipelineError::Rasterize(format!("无法执行 pdfinfo（需要安装 poppler）: {}", e)))?;
        if !output.status.success() {
            return Err(PipelineError::Rasterize(format!(
                "pdfinfo 失败: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_pdfinfo_pages(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| PipelineError::Rasterize("pdfinfo 输出中没有页数".to_string()))
    }

    async fn render(&self, pages: &[u32], out_dir: &Path) -> Result<Vec<PageImage>, PipelineError> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| PipelineError::Rasterize(format!("创建目录失败 {}: {}", out_dir.display(), e)))?;

        let mut images = Vec::with_capacity(pages.len());
        for &page in pages {
            let prefix = out_dir.join(format!("page_{}", page));
            let path = prefix.with_extension("png");
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                debug!("第 {} 页已存在，跳过渲染", page);
                images.push(PageImage { page, path });
                continue;
            }

            let status = Command::new("pdftoppm")
                .arg("-r")
                .arg(self.dpi.to_string())
                .arg("-f")
                .arg(page.to_string())
                .arg("-l")
                .arg(page.to_string())
                .arg("-png")
                .arg("-singlefile")
                .arg(&self.pdf)
                .arg(&prefix)
                .status()
                .await
                .map_err(|e| PipelineError::Rasterize(format!("无法执行 pdftoppm: {}", e)))?;
            if !status.success() {
                return Err(PipelineError::Rasterize(format!("pdftoppm 渲染第 {} 页失败", page)));
            }
            images.push(PageImage { page, path });
        }
        info!("✓ 已渲染 {} 页 (DPI {})", images.len(), self.dpi);
        Ok(images)
    }
}

fn parse_pdfinfo_pages(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|n| n.trim().parse().ok())
}

/// 预先渲染好的页面目录
pub struct ImageDirRasterizer {
    dir: PathBuf,
}

impl ImageDirRasterizer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn scan(&self) -> Result<Vec<PageImage>, PipelineError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| PipelineError::Rasterize(format!("读取目录失败 {}: {}", self.dir.display(), e)))?;
        let mut images = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::Rasterize(e.to_string()))?
        {
            let name = entry.file_name();
            let Some(page) = name
                .to_str()
                .and_then(|n| PAGE_FILE_RE.captures(n))
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
            else {
                continue;
            };
            images.push(PageImage {
                page,
                path: entry.path(),
            });
        }
        images.sort_by_key(|img| img.page);
        Ok(images)
    }
}

#[async_trait]
impl PageRasterizer for ImageDirRasterizer {
    async fn page_count(&self) -> Result<u32, PipelineError> {
        Ok(self.scan().await?.last().map(|img| img.page).unwrap_or(0))
    }

    async fn render(&self, pages: &[u32], out_dir: &Path) -> Result<Vec<PageImage>, PipelineError> {
        let same_dir = self.dir == out_dir;
        if !same_dir {
            tokio::fs::create_dir_all(out_dir)
                .await
                .map_err(|e| PipelineError::Rasterize(format!("创建目录失败 {}: {}", out_dir.display(), e)))?;
        }

        let mut images = Vec::new();
        for image in self.scan().await?.into_iter().filter(|img| pages.contains(&img.page)) {
            if same_dir {
                images.push(image);
                continue;
            }
            let file_name = image
                .path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(format!("page_{}.png", image.page)));
            let target = out_dir.join(file_name);
            tokio::fs::copy(&image.path, &target)
                .await
                .map_err(|e| PipelineError::Rasterize(format!("复制页面图片失败: {}", e)))?;
            images.push(PageImage {
                page: image.page,
                path: target,
            });
        }
        Ok(images)
    }
}
