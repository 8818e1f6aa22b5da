//! Internationalization (i18n) module for agent UI messages.

/// UI messages structure
#[derive(Debug, Clone)]
pub struct Messages {
    pub tap_here: &'static str,
    pub enter_text: &'static str,
    pub thinking: &'static str,
    pub working: &'static str,
    pub task: &'static str,
    pub result: &'static str,
    pub goal_reached: &'static str,
    pub skill_learned: &'static str,
    pub skill_known: &'static str,
    pub replay_prompt: &'static str,
    pub macro_finished: &'static str,
    pub stopped: &'static str,
    pub session_failed: &'static str,
    pub step_aborted: &'static str,
    pub busy: &'static str,
    pub no_skills: &'static str,
    pub unknown_skill: &'static str,
    pub voice_error: &'static str,
    pub guide: &'static str,
    pub auto: &'static str,
}

/// Russian messages
pub static MESSAGES_RU: Messages = Messages {
    tap_here: "Нажмите сюда",
    enter_text: "Введите текст",
    thinking: "Анализ страницы",
    working: "Выполнение",
    task: "Задача",
    result: "Результат",
    goal_reached: "Цель достигнута",
    skill_learned: "Навык сохранён",
    skill_known: "Я уже умею это делать",
    replay_prompt: "Повторить сохранённые шаги? (y/n)",
    macro_finished: "Макрос выполнен",
    stopped: "Остановлено",
    session_failed: "Сессия прервана",
    step_aborted: "Шаг прерван",
    busy: "Агент уже занят задачей",
    no_skills: "Сохранённых навыков нет",
    unknown_skill: "Навык не найден",
    voice_error: "Ошибка голосового ввода",
    guide: "Гид",
    auto: "Сам",
};

/// English messages
pub static MESSAGES_EN: Messages = Messages {
    tap_here: "Tap here",
    enter_text: "Enter text",
    thinking: "Analyzing page",
    working: "Working",
    task: "Task",
    result: "Result",
    goal_reached: "Goal reached",
    skill_learned: "Skill saved",
    skill_known: "I already know how to do this",
    replay_prompt: "Replay the saved steps? (y/n)",
    macro_finished: "Macro finished",
    stopped: "Stopped",
    session_failed: "Session aborted",
    step_aborted: "Step aborted",
    busy: "The agent is already working on a task",
    no_skills: "No saved skills",
    unknown_skill: "Skill not found",
    voice_error: "Voice input failed",
    guide: "Guide",
    auto: "Auto",
};

/// Get UI messages by language.
///
/// # Arguments
/// * `lang` - Language code, "ru" for Russian, anything else for English.
pub fn get_messages(lang: &str) -> &'static Messages {
    match lang {
        "ru" => &MESSAGES_RU,
        _ => &MESSAGES_EN,
    }
}

/// Guided-mode instruction for a click.
pub fn click_instruction(lang: &str) -> String {
    get_messages(lang).tap_here.to_string()
}

/// Guided-mode instruction for typing `value`.
pub fn type_instruction(lang: &str, value: &str) -> String {
    format!("{}: \"{}\"", get_messages(lang).enter_text, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_messages() {
        assert_eq!(get_messages("ru").tap_here, "Нажмите сюда");
        assert_eq!(get_messages("en").tap_here, "Tap here");
        assert_eq!(get_messages("de").tap_here, "Tap here");
    }

    #[test]
    fn test_instructions() {
        assert_eq!(click_instruction("ru"), "Нажмите сюда");
        assert_eq!(type_instruction("ru", "hello"), "Введите текст: \"hello\"");
        assert_eq!(type_instruction("en", "42"), "Enter text: \"42\"");
    }
}
