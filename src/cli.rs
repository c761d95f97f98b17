//! Interface de linha de comando do baton baseada em clap.
//!
//! Subcomandos [`Command`] (run, resume, status) e flags globais
//! (--threshold, --max-attempts, --offline, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// baton: revisão de pull requests em lote, em execuções limitadas que
/// passam o estado adiante.
#[derive(Debug, Parser)]
#[command(name = "baton", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Eventos de histórico por execução antes de um handoff.
    #[arg(long, global = true)]
    pub threshold: Option<usize>,

    /// Tentativas por sub-análise, incluindo a primeira.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Usa as análises heurísticas mesmo com uma chave API configurada.
    #[arg(long, global = true, default_value_t = false)]
    pub offline: bool,

    /// Diretório dos checkpoints (padrão: o do baton.toml).
    #[arg(long, global = true)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submete um novo job e o executa até o fim.
    Run {
        /// Gera N pull requests sintéticos.
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        items: Option<usize>,

        /// Arquivo JSON com a lista de itens.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Identificador do job (padrão: gerado).
        #[arg(long)]
        job_id: Option<String>,
    },

    /// Retoma um job a partir do último checkpoint.
    Resume {
        #[arg(long)]
        job_id: String,
    },

    /// Mostra o progresso registrado de um job.
    Status {
        #[arg(long)]
        job_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_with_items() {
        let cli = Cli::parse_from(["baton", "run", "--items", "9000"]);
        match cli.command {
            Command::Run { items, file, job_id } => {
                assert_eq!(items, Some(9000));
                assert!(file.is_none());
                assert!(job_id.is_none());
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_run_needs_items_or_file() {
        assert!(Cli::try_parse_from(["baton", "run"]).is_err());
        let both = ["baton", "run", "--items", "3", "--file", "prs.json"];
        assert!(Cli::try_parse_from(both).is_err());
        assert!(Cli::try_parse_from(["baton", "run", "--file", "prs.json"]).is_ok());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "baton",
            "--threshold",
            "500",
            "--max-attempts",
            "2",
            "--offline",
            "--verbose",
            "status",
            "--job-id",
            "batch-1",
        ]);
        assert!(cli.verbose);
        assert!(cli.offline);
        assert_eq!(cli.threshold, Some(500));
        assert_eq!(cli.max_attempts, Some(2));
        assert!(matches!(cli.command, Command::Status { job_id } if job_id == "batch-1"));
    }

    #[test]
    fn cli_parses_resume() {
        let cli = Cli::parse_from(["baton", "resume", "--job-id", "batch-7"]);
        assert!(matches!(cli.command, Command::Resume { job_id } if job_id == "batch-7"));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
