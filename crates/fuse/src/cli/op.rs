use std::fmt::Display;

use emporous_fuse::config::RootConfig;

/// Shared state handed to every command
#[derive(Debug, Clone)]
pub struct OpContext {
    pub config: RootConfig,
}

impl OpContext {
    pub fn new(config: RootConfig) -> Self {
        Self { config }
    }
}

/// A CLI command
#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Output: Display;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

/// Generate `Command`, `OpError` and `OpOutput` enums dispatching to a list
/// of `(Variant, OpType)` pairs. Doc comments on a pair become the command
/// help; `cfg` attributes gate every generated variant and match arm.
#[macro_export]
macro_rules! command_enum {
    ($(
        $(#[doc = $doc:literal])*
        $(#[cfg($cfg:meta)])*
        ($variant:ident, $ty:ty)
    ),* $(,)?) => {
        #[derive(clap::Subcommand, Debug, Clone)]
        pub enum Command {
            $( $(#[doc = $doc])* $(#[cfg($cfg)])* $variant($ty), )*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $( $(#[cfg($cfg)])* #[error(transparent)] $variant(<$ty as $crate::cli::op::Op>::Error), )*
        }

        pub enum OpOutput {
            $( $(#[cfg($cfg)])* $variant(<$ty as $crate::cli::op::Op>::Output), )*
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $( $(#[cfg($cfg)])* OpOutput::$variant(output) => write!(f, "{}", output), )*
                }
            }
        }

        impl Command {
            pub async fn execute(
                &self,
                ctx: &$crate::cli::op::OpContext,
            ) -> Result<OpOutput, OpError> {
                match self {
                    $(
                        $(#[cfg($cfg)])*
                        Command::$variant(op) => $crate::cli::op::Op::execute(op, ctx)
                            .await
                            .map(OpOutput::$variant)
                            .map_err(OpError::$variant),
                    )*
                }
            }
        }
    };
}
