use anyhow::Result;
use clap::Parser;

use exam_tutor::cli::Args;
use exam_tutor::App;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行并加载配置
    let (config, options) = Args::parse().into_parts()?;

    // 初始化并运行应用
    App::initialize(config, options).await?.run().await?;

    Ok(())
}
