use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// 媒体库后台任务客户端
#[derive(Parser, Debug)]
#[command(name = "vaultctl")]
#[command(version)]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "启动并跟踪媒体库的导出与批量任务", long_about = None)]
pub struct Cli {
    /// 服务端地址
    #[arg(long, value_name = "URL", global = true)]
    #[arg(value_hint = clap::ValueHint::Url)]
    pub server: Option<String>,

    /// 访问令牌
    #[arg(long, value_name = "TOKEN", global = true)]
    pub token: Option<String>,

    /// 任务状态文件
    #[arg(long, value_name = "PATH", global = true)]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub state_file: Option<PathBuf>,

    /// JSON 配置文件
    #[arg(long, value_name = "FILE", global = true)]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 导出并下载
    Download {
        #[command(subcommand)]
        target: DownloadTarget,
    },

    /// 向相册添加文件
    AddFiles {
        /// 相册ID
        #[arg(long, value_name = "ID")]
        album: u64,

        /// 要添加的文件ID
        #[arg(required = true, value_name = "FILE_ID")]
        file_ids: Vec<String>,
    },

    /// 删除相册
    DeleteAlbum {
        /// 相册ID
        #[arg(value_name = "ID")]
        album_id: u64,

        /// 同时删除相册中的文件
        #[arg(long)]
        delete_files: bool,
    },

    /// 恢复上次未结束的任务并继续跟踪
    Resume,

    /// 列出已保存的任务记录（不访问服务端）
    Pending,
}

#[derive(Subcommand, Debug)]
pub enum DownloadTarget {
    /// 单个相册
    Album {
        /// 相册ID
        #[arg(value_name = "ID")]
        id: u64,

        /// 进度中显示的名称
        #[arg(long, value_name = "NAME")]
        name: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// 整个媒体库
    Vault {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// 应用数据
    #[command(name = "appdata")]
    AppData {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// 元数据
    Metadata {
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// 导出完成后保存产物的目录
    #[arg(long, value_name = "DIR")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_album_download_with_global_flags() {
        let cli = Cli::parse_from([
            "vaultctl",
            "download",
            "album",
            "7",
            "--name",
            "Holiday",
            "--output",
            "out",
            "--server",
            "http://vault.local/",
        ]);
        assert_eq!(cli.server.as_deref(), Some("http://vault.local/"));
        match cli.command {
            Command::Download {
                target: DownloadTarget::Album { id, name, output },
            } => {
                assert_eq!(id, 7);
                assert_eq!(name.as_deref(), Some("Holiday"));
                assert_eq!(output.output, Some(PathBuf::from("out")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn add_files_requires_at_least_one_file() {
        assert!(Cli::try_parse_from(["vaultctl", "add-files", "--album", "3"]).is_err());
        let cli = Cli::parse_from(["vaultctl", "add-files", "--album", "3", "f1", "f2"]);
        assert!(matches!(
            cli.command,
            Command::AddFiles { album: 3, ref file_ids } if file_ids.len() == 2
        ));
    }

    #[test]
    fn appdata_subcommand_name() {
        let cli = Cli::parse_from(["vaultctl", "download", "appdata"]);
        assert!(matches!(
            cli.command,
            Command::Download {
                target: DownloadTarget::AppData { .. }
            }
        ));
    }
}
