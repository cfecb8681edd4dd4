use crate::models::Criterion;

pub const SEMESTERS: [&str; 5] = [
    "Primer Semestre",
    "Segundo Semestre",
    "Tercer Semestre",
    "Cuarto Semestre",
    "Quinto Semestre",
];

const fn criterion(
    id: &'static str,
    name: &'static str,
    weight: f64,
    description: &'static str,
) -> Criterion {
    Criterion {
        id,
        name,
        weight,
        description,
    }
}

// Weights in every semester must sum to 100.
const FIRST: [Criterion; 5] = [
    criterion("1-1", "Definición del Problema", 20.0, "Claridad y delimitación del problema de investigación."),
    criterion("1-2", "Revisión del Estado del Arte", 25.0, "Profundidad y pertinencia de la literatura revisada."),
    criterion("1-3", "Justificación y Relevancia", 20.0, "Importancia del problema y contribución potencial."),
    criterion("1-4", "Hipótesis u Objetivo General", 15.0, "Coherencia y claridad de la hipótesis o el objetivo."),
    criterion("1-5", "Viabilidad Técnica y Académica", 20.0, "Factibilidad del proyecto con los recursos y tiempo disponibles."),
];

const SECOND: [Criterion; 5] = [
    criterion("2-1", "Marco Teórico Profundizado", 20.0, "Solidez y profundidad del marco teórico que sustenta la investigación."),
    criterion("2-2", "Metodología", 25.0, "Claridad, adecuación y rigor del diseño metodológico propuesto."),
    criterion("2-3", "Modelo Analítico o Computacional", 20.0, "Desarrollo y coherencia del modelo a utilizar."),
    criterion("2-4", "Avances Prácticos o Simulados", 20.0, "Resultados preliminares obtenidos y su análisis inicial."),
    criterion("2-5", "Plan de Trabajo Ajustado", 15.0, "Ajustes y realismo del plan de trabajo para las siguientes etapas."),
];

const THIRD: [Criterion; 5] = [
    criterion("3-1", "Implementación Técnica/Prototipo", 25.0, "Calidad y avance de la implementación o prototipo desarrollado."),
    criterion("3-2", "Análisis Intermedio de Resultados", 25.0, "Profundidad del análisis de los resultados obtenidos hasta la fecha."),
    criterion("3-3", "Comparación con Estado del Arte", 15.0, "Análisis comparativo de los resultados con trabajos relacionados."),
    criterion("3-4", "Identificación de Problemas Técnicos", 15.0, "Capacidad para identificar y proponer soluciones a problemas encontrados."),
    criterion("3-5", "Comunicación Técnica y Visual", 20.0, "Claridad en la presentación de avances y resultados."),
];

const FOURTH: [Criterion; 5] = [
    criterion("4-1", "Resultados Completos y Validados", 30.0, "Presentación y validación de los resultados finales de la investigación."),
    criterion("4-2", "Discusión y Contribución Científica", 25.0, "Análisis profundo de los resultados y su aporte al conocimiento."),
    criterion("4-3", "Redacción de Artículos o Tesis", 20.0, "Avance y calidad en la redacción de productos científicos."),
    criterion("4-4", "Publicaciones/Divulgación", 15.0, "Esfuerzos y logros en la divulgación de la investigación."),
    criterion("4-5", "Preparación para Defensa", 10.0, "Madurez y preparación del trabajo para la defensa de tesis."),
];

const FIFTH: [Criterion; 5] = [
    criterion("5-1", "Diagnóstico de Retrasos", 20.0, "Justificación clara y fundamentada de la necesidad de extensión."),
    criterion("5-2", "Plan de Recuperación", 25.0, "Plan de trabajo detallado y realista para concluir la tesis."),
    criterion("5-3", "Nuevos Avances Técnicos", 20.0, "Resultados concluyentes adicionales obtenidos durante la extensión."),
    criterion("5-4", "Impacto de la Ampliación", 15.0, "Análisis del impacto de los nuevos resultados en la contribución final."),
    criterion("5-5", "Compromiso Académico", 20.0, "Demostración de un compromiso claro para la finalización del grado."),
];

/// Rubric for a semester label. Unknown semesters have an empty rubric.
pub fn criteria_for(semester: &str) -> &'static [Criterion] {
    match semester {
        "Primer Semestre" => &FIRST,
        "Segundo Semestre" => &SECOND,
        "Tercer Semestre" => &THIRD,
        "Cuarto Semestre" => &FOURTH,
        "Quinto Semestre" => &FIFTH,
        _ => &[],
    }
}

pub fn is_known_semester(semester: &str) -> bool {
    SEMESTERS.contains(&semester)
}

/// "Tercer Semestre" -> "Tercer S", used as a compact chart/report label.
pub fn short_label(semester: &str) -> String {
    semester.replace(" Semestre", " S")
}
