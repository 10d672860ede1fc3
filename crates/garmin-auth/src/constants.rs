//! Garmin Connect endpoint constants
//!
//! Host and path constants for the SSO and Connect API surfaces. These are
//! not secrets — the consumer key/secret identifying the client application
//! are fetched at runtime (or supplied via configuration), and user tokens
//! are managed by the token storage.

/// Primary domain family for Garmin Connect accounts
pub const DEFAULT_DOMAIN: &str = "garmin.com";

/// China-region domain family; credentials are issued per domain and do not
/// transfer between regions
pub const CHINA_DOMAIN: &str = "garmin.cn";

/// User agent sent on SSO login requests
pub const SSO_USER_AGENT: &str = "com.garmin.android.apps.connectmobile";

/// Client identifier sent on Connect API requests
pub const API_USER_AGENT: &str = "GCM-iOS-5.7.2.1";

/// Well-known location of the public OAuth consumer key/secret used when no
/// consumer credentials are configured
pub const CONSUMER_BOOTSTRAP_URL: &str = "https://thegarth.s3.amazonaws.com/oauth_consumer.json";

/// Pre-authorization endpoint path (ticket → OAuth1 credential), relative to
/// the `connectapi` host
pub const PREAUTHORIZED_PATH: &str = "/oauth-service/oauth/preauthorized";

/// Exchange endpoint path (OAuth1 credential → OAuth2 token), relative to
/// the `connectapi` host
pub const EXCHANGE_PATH: &str = "/oauth-service/oauth/exchange/user/2.0";

/// Page title of a successful SSO credential submission
pub const SUCCESS_TITLE: &str = "Success";

/// Substring of the page title that signals an MFA challenge
pub const MFA_TITLE_MARKER: &str = "MFA";
