// LLM-friendly documentation endpoint content.

pub const LLMS_TXT: &str = r#"# Prompt Wizard API
> An educational battle game where players defeat creatures by writing clear, targeted prompts ("spells").

## API Base URL
/api/

## Authentication
None. Players are identified by the id returned from POST /api/players.

## Key Endpoints
- POST /evaluate (alias POST /api/spells/evaluate) - Judge one spell without a session
  body: {spell, creatureType, creatureWeakness, isBoss?, bossPhase?}
- GET /api/worlds - Worlds and their stages
- GET /api/creatures - All creatures in campaign order
- GET /api/creatures/{id} - One creature
- POST /api/players - Create a player
- GET /api/players/{id}/progress - Score, spell history, stats and achievements
- GET /api/players/{id}/map - World map with unlocked/completed stages
- GET /api/players/{id}/battle - Current battle
- POST /api/players/{id}/battle - Start a battle, body: {creatureId}
- POST /api/players/{id}/battle/cast - Cast a spell, body: {spell}
- POST /api/players/{id}/battle/reset - Restart the current battle
- DELETE /api/players/{id}/battle - Return to creature selection
- POST /api/players/{id}/debug/unlock-all - Unlock the final stage (debug builds only)

## Spells
- 1 to 500 characters.
- Screened by content moderation first; blocked spells return 400 with
  {error: "moderation_failure", type: "content_moderation", flaggedCategories}.
- Judged for effectiveness (1-10) and damage (0-100) against the creature's weakness.
- Self-healing spells deal no damage and restore 10-50 health.

## Errors
JSON bodies of the form {"error": "..."}; 404 unknown player or creature,
403 locked stage, 409 turn already in flight or encounter over.

## Other
- GET /health - Liveness
- GET /metrics - Prometheus metrics
"#;
