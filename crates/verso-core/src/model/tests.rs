use crate::error::VersoError;
use crate::model::*;

fn test_user(is_admin: bool) -> User {
    User {
        id: 7,
        username: "tatiana".into(),
        password_hash: "$2b$12$hash".into(),
        is_admin,
        created_at: chrono::Utc::now(),
        about: String::new(),
        show_all_tab: false,
        pinned_poem_id: None,
    }
}

#[test]
fn test_session_ids_are_random() {
    let a = ChatSession::new(1, 1);
    let b = ChatSession::new(1, 1);
    assert_ne!(a.id, b.id);
    assert_eq!(a.id.get_version_num(), 4);
}

#[test]
fn test_role_display_and_parse() {
    assert_eq!(Role::User.to_string(), "user");
    assert_eq!(Role::Model.to_string(), "model");
    assert_eq!("model".parse::<Role>().unwrap(), Role::Model);
    assert_eq!("Assistant".parse::<Role>().unwrap(), Role::Model);
    assert!("system".parse::<Role>().is_err());
}

#[test]
fn test_role_serde() {
    assert_eq!(serde_json::to_string(&Role::Model).unwrap(), "\"model\"");
    let legacy: Role = serde_json::from_str("\"assistant\"").unwrap();
    assert_eq!(legacy, Role::Model);
}

#[test]
fn test_password_hash_never_serialized() {
    let json = serde_json::to_string(&test_user(false)).unwrap();
    assert!(!json.contains("password_hash"));
    assert!(!json.contains("$2b$"));
    assert!(json.contains("\"username\":\"tatiana\""));
}

#[test]
fn test_anonymous_caller_is_unauthorized() {
    let caller = Caller::Anonymous;
    assert!(matches!(
        caller.require_user(),
        Err(VersoError::Unauthorized(_))
    ));
    assert!(caller.as_user().is_none());
}

#[test]
fn test_require_admin() {
    assert!(Caller::user(test_user(true)).require_admin().is_ok());
    assert!(matches!(
        Caller::user(test_user(false)).require_admin(),
        Err(VersoError::Forbidden(_))
    ));
    assert!(matches!(
        Caller::Anonymous.require_admin(),
        Err(VersoError::Unauthorized(_))
    ));
}

#[test]
fn test_validate_username() {
    assert_eq!(validate_username("  anna ").unwrap(), "anna");
    assert!(validate_username("ab").is_err());
    assert!(validate_username("two words").is_err());
    assert!(validate_username(&"x".repeat(MAX_USERNAME_LENGTH + 1)).is_err());
}

#[test]
fn test_validate_password() {
    assert!(validate_password("abcd").is_ok());
    assert!(validate_password("abc").is_err());
}

#[test]
fn test_poem_input_trims_but_keeps_body() {
    let input = PoemInput::new("  Autumn ", " A. Pushkin ", "  October has come\n").validated();
    let input = input.unwrap();
    assert_eq!(input.title, "Autumn");
    assert_eq!(input.author, "A. Pushkin");
    assert_eq!(input.content, "  October has come\n");
}

#[test]
fn test_poem_input_rejects_empty_fields() {
    assert!(PoemInput::new("", "a", "b").validated().is_err());
    assert!(PoemInput::new("t", "  ", "b").validated().is_err());
    assert!(PoemInput::new("t", "a", " \n ").validated().is_err());
}

#[test]
fn test_poem_input_rejects_unknown_fields() {
    let result: Result<PoemInput, _> =
        serde_json::from_str(r#"{"title":"t","author":"a","content":"c","year":1833}"#);
    assert!(result.is_err());
}

#[test]
fn test_profile_update_limits_about() {
    let update = ProfileUpdate {
        about: Some("  I read Lermontov on trains.  ".into()),
        show_all_tab: None,
    }
    .validated()
    .unwrap();
    assert_eq!(update.about.as_deref(), Some("I read Lermontov on trains."));

    let too_long = ProfileUpdate {
        about: Some("x".repeat(MAX_ABOUT_LENGTH + 1)),
        show_all_tab: Some(true),
    };
    assert!(matches!(too_long.validated(), Err(VersoError::InvalidInput(_))));
}

#[test]
fn test_profile_update_rejects_unknown_fields() {
    let parsed: Result<ProfileUpdate, _> = serde_json::from_str(r#"{"about": "hi", "is_admin": true}"#);
    assert!(parsed.is_err());
}

#[test]
fn test_reader_profile_flattens_user() {
    let profile = ReaderProfile {
        user: test_user(false),
        read_poem_ids: vec![3, 5],
    };
    let json = serde_json::to_value(&profile).unwrap();
    assert_eq!(json["username"], "tatiana");
    assert_eq!(json["read_poem_ids"], serde_json::json!([3, 5]));
    assert!(json.get("password_hash").is_none());
}

#[test]
fn test_toggle_status_serde() {
    assert_eq!(serde_json::to_string(&ReadStatus::Marked).unwrap(), "\"marked\"");
    assert_eq!(serde_json::to_string(&PinStatus::Unpinned).unwrap(), "\"unpinned\"");
}
