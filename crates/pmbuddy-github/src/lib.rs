pub mod token;

pub use token::{
    app_jwt, app_jwt_from_pem_file, installation_token_from_env, AgentTokens, AppClaims,
    GitHubAppClient, InstallationToken,
};
