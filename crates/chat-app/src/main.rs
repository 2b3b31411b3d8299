use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use parley::chat::{Message, Role};
use parley::cache::{API_KEY, ORGANIZATION};
use parley::error::{CacheSnafu, StorageSnafu, TerminalSnafu};
use parley::route::Route;
use parley::session::{ProfileUpdate, User};
use parley::settings::SettingsStore;
use parley::{AppContext, AppResult};
use parley_llm::GptVersion;
use parley_storage::{ChatId, ChatStore, SignUpOutcome};
use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "parley", version)]
#[command(about = "Chat with OpenAI models; conversations are kept in your backend")]
struct Cli {
    /// Settings file to use instead of the default location
    #[arg(long, env = "PARLEY_CONFIG", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with email and password
    Signin {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and forget the stored session
    Signout,
    /// Show the signed-in user
    Whoami,
    /// Update the display name or avatar
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        image_url: Option<String>,
    },
    /// Set or clear the OpenAI key and organization, or pick the model
    Settings {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        org: Option<String>,
        /// Remove the stored key and organization
        #[arg(long, conflicts_with_all = ["api_key", "org"])]
        clear: bool,
        #[arg(long, value_enum)]
        model: Option<ModelChoice>,
    },
    /// List, rename or delete conversations
    Chats {
        #[command(subcommand)]
        action: Option<ChatsAction>,
    },
    /// Chat interactively; reads prompts from stdin
    Chat {
        /// Continue an existing conversation
        #[arg(long)]
        id: Option<ChatId>,
    },
}

#[derive(Subcommand)]
enum ChatsAction {
    List,
    Rename { id: ChatId, title: String },
    Delete { id: ChatId },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelChoice {
    #[value(name = "3.5")]
    Gpt35,
    #[value(name = "4")]
    Gpt4,
}

impl From<ModelChoice> for GptVersion {
    fn from(choice: ModelChoice) -> Self {
        match choice {
            ModelChoice::Gpt35 => Self::Gpt35,
            ModelChoice::Gpt4 => Self::Gpt4,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    init_tracing(&settings.settings().log_level);

    match run(cli.command, settings).await {
        Ok(code) => code,
        Err(error) => {
            tracing::debug!(stage = error.stage(), error = %error, "command failed");
            eprintln!("{}", error.alert());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_level: &str) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(filter) => filter,
            Err(error) => {
                eprintln!(
                    "WARN: log_level '{log_level}' is not a valid tracing filter ({error}); falling back to 'info'"
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

async fn run(command: Command, settings: SettingsStore) -> AppResult<ExitCode> {
    let app = AppContext::connect(settings)?;

    match command {
        Command::Signin { email, password } => {
            let snapshot = app.session().sign_in(&email, &password).await?;
            if let Some(user) = &snapshot.user {
                print_user(user);
            }
        }
        Command::Signup { email, password } => {
            match app.session().sign_up(&email, &password).await? {
                SignUpOutcome::SignedIn(_) => {
                    if let Some(user) = app.session().current_user() {
                        print_user(&user);
                    }
                }
                SignUpOutcome::ConfirmationRequired(_) => {
                    println!("Check {} to confirm your account, then sign in.", email.trim());
                }
            }
        }
        Command::Signout => {
            restore_session(&app).await;
            app.session().sign_out().await?;
            println!("Signed out.");
        }
        Command::Whoami => {
            restore_session(&app).await;
            match app.session().current_user() {
                Some(user) => print_user(&user),
                None => println!("Not signed in."),
            }
        }
        Command::Profile { name, image_url } => {
            restore_session(&app).await;
            if !enter(&app, Route::Profile) {
                return Ok(ExitCode::FAILURE);
            }
            if name.is_none() && image_url.is_none() {
                if let Some(user) = app.session().current_user() {
                    print_user(&user);
                }
            } else {
                let user = app
                    .session()
                    .update_profile(ProfileUpdate { name, image_url })
                    .await?;
                print_user(&user);
            }
        }
        Command::Settings {
            api_key,
            org,
            clear,
            model,
        } => {
            restore_session(&app).await;
            if !enter(&app, Route::Settings) {
                return Ok(ExitCode::FAILURE);
            }
            update_settings(&app, api_key, org, clear, model)?;
        }
        Command::Chats { action } => {
            restore_session(&app).await;
            if !enter(&app, Route::Chats) {
                return Ok(ExitCode::FAILURE);
            }
            manage_chats(&app, action.unwrap_or(ChatsAction::List)).await?;
        }
        Command::Chat { id } => {
            restore_session(&app).await;
            if !enter(&app, Route::Chat(id)) {
                return Ok(ExitCode::FAILURE);
            }
            chat(&app, id).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// A failed restore leaves the user signed out; the command decides what that means.
async fn restore_session(app: &AppContext) {
    if let Err(error) = app.session().restore().await {
        tracing::warn!(stage = error.stage(), error = %error, "session restore failed");
        eprintln!("{}", error.alert());
    }
}

fn enter(app: &AppContext, requested: Route) -> bool {
    match app.route(requested) {
        Route::Welcome if requested != Route::Welcome => {
            eprintln!("Sign in first: parley signin --email <EMAIL>");
            false
        }
        Route::Settings if requested != Route::Settings => {
            eprintln!(
                "Add your OpenAI key and organization first: parley settings --api-key <KEY> --org <ORG>"
            );
            false
        }
        _ => true,
    }
}

fn update_settings(
    app: &AppContext,
    api_key: Option<String>,
    org: Option<String>,
    clear: bool,
    model: Option<ModelChoice>,
) -> AppResult<()> {
    let credentials = app.credentials();
    let stage = "update-credentials";

    if clear {
        credentials
            .remove_credentials()
            .context(CacheSnafu { stage })?;
    }
    match (api_key, org) {
        (Some(api_key), Some(org)) => credentials
            .set_credentials(&api_key, &org)
            .context(CacheSnafu { stage })?,
        (Some(api_key), None) => credentials
            .set(API_KEY, api_key.trim())
            .context(CacheSnafu { stage })?,
        (None, Some(org)) => credentials
            .set(ORGANIZATION, org.trim())
            .context(CacheSnafu { stage })?,
        (None, None) => {}
    }
    if let Some(model) = model {
        app.models()
            .select(model.into())
            .context(CacheSnafu {
                stage: "select-model",
            })?;
    }

    let configured = if credentials.credentials().is_some() {
        "set"
    } else {
        "missing"
    };
    println!("credentials: {configured}");
    let current = app.models().current_model();
    for model in app.models().available_models() {
        let marker = if model.id == current.id { "*" } else { " " };
        let description = model.description.as_deref().unwrap_or_default();
        println!("{marker} {:<14} {description}", model.id);
    }
    Ok(())
}

async fn manage_chats(app: &AppContext, action: ChatsAction) -> AppResult<()> {
    let storage = app.storage();
    match action {
        ChatsAction::List => {
            let chats = storage.get_chats().await.context(StorageSnafu {
                stage: "list-chats",
            })?;
            if chats.is_empty() {
                println!("No chats yet.");
            }
            for chat in chats {
                println!("{:>6}  {}", chat.id, chat.title);
            }
        }
        ChatsAction::Rename { id, title } => {
            let chat = storage
                .rename_chat(id, title.trim().to_string())
                .await
                .context(StorageSnafu {
                    stage: "rename-chat",
                })?;
            println!("{:>6}  {}", chat.id, chat.title);
        }
        ChatsAction::Delete { id } => {
            storage.delete_chat(id).await.context(StorageSnafu {
                stage: "delete-chat",
            })?;
            println!("Deleted chat {id}.");
        }
    }
    Ok(())
}

async fn chat(app: &AppContext, id: Option<ChatId>) -> AppResult<()> {
    // The route gate has already checked the credentials.
    let Some(provider) = app.provider()? else {
        return Ok(());
    };
    let mut session = app.chat_session(provider);

    if let Some(id) = id {
        session.open(id).await?;
        for message in session.messages() {
            print_message(message);
        }
    }
    eprintln!("model: {} (Ctrl-D to quit)", session.model_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout()
            .flush()
            .context(TerminalSnafu { stage: "flush-prompt" })?;

        let Some(line) = lines
            .next_line()
            .await
            .context(TerminalSnafu { stage: "read-prompt" })?
        else {
            break;
        };

        let result = session
            .send(&line, |fragment| {
                print!("{fragment}");
                let _ = std::io::stdout().flush();
            })
            .await;
        println!();

        // Stream failures are shown and the conversation continues.
        if let Err(error) = result {
            eprintln!("{}", error.alert());
        }
    }

    if let Some(chat_id) = session.chat_id() {
        eprintln!("chat {chat_id} saved");
    }
    Ok(())
}

fn print_user(user: &User) {
    println!("{} <{}>", user.name, user.email);
    println!("id:     {}", user.id);
    println!("avatar: {}", user.image_url);
}

fn print_message(message: &Message) {
    let speaker = match message.role {
        Role::User => ">",
        Role::Bot => "bot:",
    };
    println!("{speaker} {}", message.content);
}
