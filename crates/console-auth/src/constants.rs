//! GraphQL documents and defaults for the magazine API auth operations
//!
//! The login, refresh and logout operations are sent as raw documents so the
//! auth crate has no dependency on a schema or codegen step.

/// Local development endpoint
pub const DEV_ENDPOINT: &str = "http://localhost:4000/graphql";

/// Role assigned when the login payload carries no role
pub const DEFAULT_ROLE: &str = "contributor";

/// Application error codes that mean the caller's credentials are not usable
pub const AUTH_ERROR_CODES: &[&str] = &["UNAUTHENTICATED", "UNAUTHORIZED"];

pub const LOGIN_MUTATION: &str = r#"
  mutation Login($input: LoginInput!) {
    login(input: $input) {
      access_token
      refresh_token
      expires_in
      user {
        id
        email
        display_name
        avatar_url
        is_active
        role {
          name
        }
      }
    }
  }
"#;

pub const REFRESH_TOKEN_MUTATION: &str = r#"
  mutation RefreshToken($input: RefreshTokenInput!) {
    refreshToken(input: $input) {
      access_token
      refresh_token
      expires_in
    }
  }
"#;

pub const LOGOUT_MUTATION: &str = r#"
  mutation Logout($input: LogoutInput!) {
    logout(input: $input) {
      success
    }
  }
"#;

pub const CURRENT_USER_QUERY: &str = r#"
  query GetCurrentUser {
    me {
      id
      email
      display_name
      avatar_url
      is_active
      role {
        name
      }
    }
  }
"#;
