//! Session acquisition state machine. Tries to reuse the category's
//! persistent profile first, and only then walks the full login flow:
//! identity, optional extra-verification username step, password, and an
//! out-of-band OTP challenge when the site demands one.
use crate::config::Credentials;
use crate::driver::{dump_page, DriverError, LoginProbe, UiDriver};
use crate::model::AuthFailure;
use crate::otp::{poll_otp, OtpPolicy, OtpSource};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Proof that one category holds an authenticated session, bound to its
/// persistent profile directory. Valid until the driver session closes.
#[derive(Debug)]
pub struct SessionHandle {
    pub category: String,
    pub profile_dir: PathBuf,
    /// True when an existing session was reused without a full login.
    pub reused: bool,
}

/// Page markers and locators the login flow observes and drives. All of
/// it is injected; the state machine reads no ambient state.
#[derive(Debug, Clone)]
pub struct AuthParams {
    pub home_url: String,
    pub login_url: String,
    /// Any of these, lowercased, in the body text means "logged in".
    pub logged_in_markers: Vec<String>,
    /// Body text marker for the extra username verification step.
    pub extra_verification_marker: String,
    /// Body text marker for the OTP challenge screen.
    pub otp_challenge_marker: String,
    pub settle: Duration,
    pub long_settle: Duration,
    pub otp: OtpPolicy,
    pub locators: LoginLocators,
}

/// Locators for the login surface controls.
#[derive(Debug, Clone)]
pub struct LoginLocators {
    pub identity_field: String,
    pub identity_next: String,
    pub username_field: String,
    pub username_next: String,
    pub password_field: String,
    pub login_button: String,
    pub otp_field: String,
    pub otp_next: String,
}

impl AuthParams {
    pub fn new(settle: Duration, long_settle: Duration, otp: OtpPolicy) -> Self {
        Self {
            home_url: "https://x.com/home".into(),
            login_url: "https://x.com/login".into(),
            logged_in_markers: vec!["for you".into(), "following".into()],
            extra_verification_marker: "unusual login activity".into(),
            otp_challenge_marker: "check your email".into(),
            settle,
            long_settle,
            otp,
            locators: LoginLocators {
                identity_field: "input[autocomplete='username']".into(),
                identity_next: "button:has-text('Next')".into(),
                username_field: "input[data-testid='ocfEnterTextTextInput']".into(),
                username_next: "button[data-testid='ocfEnterTextNextButton']".into(),
                password_field: "input[name='password']".into(),
                login_button: "button[data-testid='LoginForm_Login_Button']".into(),
                otp_field: "input[data-testid='ocfEnterTextTextInput']".into(),
                otp_next: "button[data-testid='ocfEnterTextNextButton']".into(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    CheckExisting,
    NeedFullLogin,
    PostIdentity,
    PostPassword,
    PostSubmit,
    OtpChallenge,
    VerifyLogin,
}

/// Establish a logged-in session for one category. The caller owns the
/// driver session (open before, close after, on every path); this
/// function only drives pages within it.
#[instrument(skip_all)]
pub async fn authenticate(
    category: &str,
    creds: &Credentials,
    driver: &dyn UiDriver,
    otp_source: &dyn OtpSource,
    params: &AuthParams,
    profile_dir: &Path,
    debug_dir: &Path,
) -> Result<SessionHandle, AuthFailure> {
    match run_machine(category, creds, driver, otp_source, params, debug_dir).await {
        Ok(reused) => Ok(SessionHandle {
            category: category.to_string(),
            profile_dir: profile_dir.to_path_buf(),
            reused,
        }),
        Err(failure) => {
            if matches!(failure, AuthFailure::Driver(_)) {
                dump_page(driver, debug_dir, "99_driver_failure").await;
            }
            Err(failure)
        }
    }
}

async fn run_machine(
    category: &str,
    creds: &Credentials,
    driver: &dyn UiDriver,
    otp_source: &dyn OtpSource,
    params: &AuthParams,
    debug_dir: &Path,
) -> Result<bool, AuthFailure> {
    let loc = &params.locators;
    let mut state = AuthState::CheckExisting;

    loop {
        state = match state {
            AuthState::CheckExisting => {
                driver.goto(&params.home_url).await?;
                dump_page(driver, debug_dir, "00_init_check_login").await;
                match probe_logged_in(driver, params).await {
                    LoginProbe::LoggedIn => {
                        info!(category, "existing session reused");
                        return Ok(true);
                    }
                    LoginProbe::NotLoggedIn | LoginProbe::Inconclusive => {
                        info!(category, "no usable session, performing full login");
                        AuthState::NeedFullLogin
                    }
                }
            }

            AuthState::NeedFullLogin => {
                driver.goto(&params.login_url).await?;
                driver.settle(params.settle).await;
                dump_page(driver, debug_dir, "01_login_start").await;
                driver.fill(&loc.identity_field, &creds.email).await?;
                driver.click(&loc.identity_next).await?;
                driver.settle(params.settle).await;
                dump_page(driver, debug_dir, "02_after_identity").await;
                AuthState::PostIdentity
            }

            AuthState::PostIdentity => {
                if body_contains(driver, &params.extra_verification_marker).await? {
                    info!(category, "extra verification step, submitting username");
                    driver.fill(&loc.username_field, &creds.username).await?;
                    driver.click(&loc.username_next).await?;
                    driver.settle(params.settle).await;
                    dump_page(driver, debug_dir, "03_after_username").await;
                }
                AuthState::PostPassword
            }

            AuthState::PostPassword => {
                driver.fill(&loc.password_field, &creds.password).await?;
                driver.click(&loc.login_button).await?;
                driver.settle(params.long_settle).await;
                dump_page(driver, debug_dir, "04_after_password").await;
                AuthState::PostSubmit
            }

            AuthState::PostSubmit => {
                if body_contains(driver, &params.otp_challenge_marker).await? {
                    info!(category, "otp challenge detected");
                    dump_page(driver, debug_dir, "05_otp_screen").await;
                    AuthState::OtpChallenge
                } else {
                    AuthState::VerifyLogin
                }
            }

            AuthState::OtpChallenge => {
                let code = poll_otp(otp_source, category, params.otp).await?;
                driver.fill(&loc.otp_field, &code).await?;
                driver.click(&loc.otp_next).await?;
                driver.settle(params.long_settle).await;
                dump_page(driver, debug_dir, "06_after_otp").await;
                AuthState::VerifyLogin
            }

            AuthState::VerifyLogin => match probe_logged_in(driver, params).await {
                LoginProbe::LoggedIn => {
                    info!(category, "login successful");
                    dump_page(driver, debug_dir, "07_login_success").await;
                    return Ok(false);
                }
                LoginProbe::NotLoggedIn | LoginProbe::Inconclusive => {
                    warn!(category, "logged-in marker absent after full login");
                    dump_page(driver, debug_dir, "98_login_failure").await;
                    return Err(AuthFailure::CredentialsRejected);
                }
            },
        };
    }
}

/// Observe whether the page shows a logged-in surface. Waits out the
/// settle delay first; a premature read gives false negatives. A failed
/// read is `Inconclusive`, which callers treat as not logged in.
async fn probe_logged_in(driver: &dyn UiDriver, params: &AuthParams) -> LoginProbe {
    driver.settle(params.settle).await;
    match driver.body_text().await {
        Ok(text) => {
            let text = text.to_lowercase();
            if params
                .logged_in_markers
                .iter()
                .any(|marker| text.contains(marker.as_str()))
            {
                LoginProbe::LoggedIn
            } else {
                LoginProbe::NotLoggedIn
            }
        }
        Err(err) => {
            warn!(?err, "login probe could not read page");
            LoginProbe::Inconclusive
        }
    }
}

async fn body_contains(driver: &dyn UiDriver, marker: &str) -> Result<bool, DriverError> {
    let text = driver.body_text().await?;
    Ok(text.to_lowercase().contains(&marker.to_lowercase()))
}
